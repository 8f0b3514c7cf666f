//! Work-size planner
//!
//! Callers think in terms of "run this many times"; devices only execute
//! work-group aligned ranges. The planner turns the former into the latter.
//!
//! Two policies exist and a program uses exactly one of them:
//!
//! - [`WorkSizePolicy::NDRange`] (default): three dimensions, dimension 0 is
//!   the explicit override or the longest buffer, local size is left to the
//!   device unless the caller supplies a hint.
//! - [`WorkSizePolicy::Legacy`]: one dimension, global size is the smallest
//!   power of two ≥ 4 covering the request, never below the kernel's
//!   preferred work-group size, which is also the local size.

use crate::backend::DeviceLimits;
use crate::error::{KiteError, Result};
use log::{debug, trace, warn};

/// Smallest global size under the legacy policy
pub const LEGACY_MIN_GLOBAL_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkSizePolicy {
    /// Power-of-two 1-D heuristic
    Legacy,
    /// 3-D range with device-selected local size
    #[default]
    NDRange,
}

/// Up to three positive extents; unused dimensions are 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    dims: usize,
    sizes: [usize; 3],
}

impl Extent {
    pub fn new(sizes: &[usize]) -> Result<Self> {
        if sizes.is_empty() || sizes.len() > 3 {
            return Err(KiteError::InvalidWorkSize(format!(
                "expected 1 to 3 dimensions, got {}",
                sizes.len()
            )));
        }
        if let Some(pos) = sizes.iter().position(|&s| s == 0) {
            return Err(KiteError::InvalidWorkSize(format!(
                "dimension {pos} has size 0"
            )));
        }
        let mut padded = [1; 3];
        padded[..sizes.len()].copy_from_slice(sizes);
        Ok(Self {
            dims: sizes.len(),
            sizes: padded,
        })
    }

    pub fn linear(size: usize) -> Result<Self> {
        Self::new(&[size])
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn sizes(&self) -> [usize; 3] {
        self.sizes
    }
}

/// What the binder learned about an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkSizeRequest {
    /// Longest buffer argument (0 if there are none)
    pub candidate: usize,
    /// Explicit global size from the options map
    pub global: Option<Extent>,
    /// Local size hint from the options map
    pub local: Option<Extent>,
}

/// Execution geometry handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGeometry {
    pub dimensions: u32,
    pub global: [usize; 3],
    /// `None` lets the backend choose
    pub local: Option<[usize; 3]>,
}

impl WorkGeometry {
    /// Total number of work items
    pub fn total(&self) -> usize {
        self.global[..self.dimensions as usize].iter().product()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkSizePlanner {
    policy: WorkSizePolicy,
}

impl WorkSizePlanner {
    pub fn new(policy: WorkSizePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> WorkSizePolicy {
        self.policy
    }

    /// Whether [`plan`](Self::plan) needs the kernel's preferred work-group size
    pub fn needs_preferred_size(&self) -> bool {
        self.policy == WorkSizePolicy::Legacy
    }

    pub fn plan(
        &self,
        request: &WorkSizeRequest,
        limits: &DeviceLimits,
        preferred_local: Option<usize>,
    ) -> Result<WorkGeometry> {
        let geometry = match self.policy {
            WorkSizePolicy::Legacy => plan_legacy(request, preferred_local.unwrap_or(1))?,
            WorkSizePolicy::NDRange => plan_nd(request, limits)?,
        };
        debug!(
            "planned {:?} geometry: global {:?}, local {:?}",
            self.policy, geometry.global, geometry.local
        );
        Ok(geometry)
    }
}

fn plan_legacy(request: &WorkSizeRequest, preferred_local: usize) -> Result<WorkGeometry> {
    if request.local.is_some() {
        warn!("local size hint ignored under the legacy work-size policy");
    }
    if request.global.is_some_and(|g| g.dims() > 1) {
        warn!("legacy work-size policy only uses the first global dimension");
    }

    let target = request
        .global
        .map(|g| g.sizes()[0])
        .unwrap_or(request.candidate);
    let local = preferred_local.max(1);

    let mut global = LEGACY_MIN_GLOBAL_SIZE;
    while global < target {
        global = global.checked_mul(2).ok_or_else(|| {
            KiteError::InvalidWorkSize(format!("global size {target} overflows"))
        })?;
    }
    if global < local {
        global = local;
    }

    Ok(WorkGeometry {
        dimensions: 1,
        global: [global, 1, 1],
        local: Some([local, 1, 1]),
    })
}

fn plan_nd(request: &WorkSizeRequest, limits: &DeviceLimits) -> Result<WorkGeometry> {
    let mut global = match request.global {
        Some(extent) => extent.sizes(),
        None => [request.candidate.max(1), 1, 1],
    };

    let local = match request.local {
        None => None,
        Some(extent) => {
            let local = extent.sizes();
            for (dim, (&size, &max)) in local
                .iter()
                .zip(limits.max_work_item_sizes.iter())
                .enumerate()
            {
                if size > max {
                    return Err(KiteError::InvalidWorkSize(format!(
                        "local size {size} exceeds the device maximum {max} in dimension {dim}"
                    )));
                }
            }
            let group = local
                .iter()
                .try_fold(1usize, |acc, &l| acc.checked_mul(l))
                .filter(|&group| group <= limits.max_work_group_size)
                .ok_or_else(|| {
                    KiteError::InvalidWorkSize(format!(
                        "work group {local:?} exceeds the device maximum of {} items",
                        limits.max_work_group_size
                    ))
                })?;
            trace!("local work group of {group} items");
            for (dim, (g, &l)) in global.iter_mut().zip(local.iter()).enumerate() {
                let size = *g;
                *g = size.div_ceil(l).checked_mul(l).ok_or_else(|| {
                    KiteError::InvalidWorkSize(format!(
                        "global size {size} overflows when rounded to {l} in dimension {dim}"
                    ))
                })?;
            }
            Some(local)
        }
    };

    Ok(WorkGeometry {
        dimensions: 3,
        global,
        local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request(candidate: usize) -> WorkSizeRequest {
        WorkSizeRequest {
            candidate,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(0, 1, 4)]
    #[case(3, 1, 4)]
    #[case(5, 1, 8)]
    #[case(8, 1, 8)]
    #[case(517, 1, 1024)]
    #[case(50446, 1, 65536)]
    #[case(8, 256, 256)]
    fn test_legacy_power_of_two(
        #[case] candidate: usize,
        #[case] preferred: usize,
        #[case] expected: usize,
    ) {
        let planner = WorkSizePlanner::new(WorkSizePolicy::Legacy);
        let geometry = planner
            .plan(&request(candidate), &DeviceLimits::default(), Some(preferred))
            .unwrap();
        assert_eq!(geometry.dimensions, 1);
        assert_eq!(geometry.global, [expected, 1, 1]);
        assert_eq!(geometry.local, Some([preferred, 1, 1]));
    }

    #[test]
    fn test_legacy_override_replaces_candidate() {
        let planner = WorkSizePlanner::new(WorkSizePolicy::Legacy);
        let req = WorkSizeRequest {
            candidate: 517,
            global: Some(Extent::linear(10).unwrap()),
            local: None,
        };
        let geometry = planner
            .plan(&req, &DeviceLimits::default(), Some(1))
            .unwrap();
        assert_eq!(geometry.global, [16, 1, 1]);
    }

    #[rstest]
    #[case(0, [1, 1, 1])]
    #[case(5, [5, 1, 1])]
    #[case(50446, [50446, 1, 1])]
    fn test_nd_uses_longest_buffer(#[case] candidate: usize, #[case] expected: [usize; 3]) {
        let geometry = WorkSizePlanner::default()
            .plan(&request(candidate), &DeviceLimits::default(), None)
            .unwrap();
        assert_eq!(geometry.dimensions, 3);
        assert_eq!(geometry.global, expected);
        assert_eq!(geometry.local, None);
    }

    #[test]
    fn test_nd_override_extends_dimensions() {
        let req = WorkSizeRequest {
            candidate: 8,
            global: Some(Extent::new(&[64, 32]).unwrap()),
            local: None,
        };
        let geometry = WorkSizePlanner::default()
            .plan(&req, &DeviceLimits::default(), None)
            .unwrap();
        assert_eq!(geometry.global, [64, 32, 1]);
        assert_eq!(geometry.total(), 64 * 32);
    }

    #[test]
    fn test_nd_local_hint_aligns_global() {
        let req = WorkSizeRequest {
            candidate: 100,
            global: None,
            local: Some(Extent::linear(32).unwrap()),
        };
        let geometry = WorkSizePlanner::default()
            .plan(&req, &DeviceLimits::default(), None)
            .unwrap();
        assert_eq!(geometry.global, [128, 1, 1]);
        assert_eq!(geometry.local, Some([32, 1, 1]));
    }

    #[rstest]
    #[case(&[512])]
    #[case(&[16, 16, 2])]
    fn test_nd_local_hint_beyond_limits(#[case] local: &[usize]) {
        let req = WorkSizeRequest {
            candidate: 100,
            global: None,
            local: Some(Extent::new(local).unwrap()),
        };
        let result = WorkSizePlanner::default().plan(&req, &DeviceLimits::default(), None);
        assert!(matches!(result, Err(KiteError::InvalidWorkSize(_))));
    }

    #[rstest]
    #[case(&[usize::MAX], &[2])]
    #[case(&[8, usize::MAX - 1], &[1, 4])]
    fn test_nd_rounding_overflow(#[case] global: &[usize], #[case] local: &[usize]) {
        let req = WorkSizeRequest {
            candidate: 1,
            global: Some(Extent::new(global).unwrap()),
            local: Some(Extent::new(local).unwrap()),
        };
        let result = WorkSizePlanner::default().plan(&req, &DeviceLimits::default(), None);
        assert!(matches!(result, Err(KiteError::InvalidWorkSize(_))));
    }

    #[rstest]
    #[case(&[])]
    #[case(&[1, 2, 3, 4])]
    #[case(&[4, 0])]
    fn test_invalid_extent(#[case] sizes: &[usize]) {
        assert!(Extent::new(sizes).is_err());
    }
}

use crate::config::DEFAULT_CONCURRENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size: u64,
    pub concurrency: usize,
}

/// Clamps the requested part size into the store's accepted range and
/// replaces a zero concurrency with the default. When the store range is
/// inverted the maximum wins.
pub fn plan(
    requested_part_size: u64,
    requested_concurrency: usize,
    store_min_part_size: u64,
    store_max_part_size: u64,
) -> PartPlan {
    let part_size = requested_part_size
        .max(store_min_part_size)
        .min(store_max_part_size)
        .max(1);
    let concurrency = if requested_concurrency == 0 {
        DEFAULT_CONCURRENCY
    } else {
        requested_concurrency
    };

    PartPlan {
        part_size,
        concurrency,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{PartPlan, plan};
    use crate::config::{MIB, STORE_MAX_PART_SIZE, STORE_MIN_PART_SIZE};

    #[test]
    fn clamps_part_size_to_store_bounds() {
        let small = plan(MIB, 4, STORE_MIN_PART_SIZE, STORE_MAX_PART_SIZE);
        assert_eq!(small.part_size, STORE_MIN_PART_SIZE);

        let huge = plan(u64::MAX, 4, STORE_MIN_PART_SIZE, STORE_MAX_PART_SIZE);
        assert_eq!(huge.part_size, STORE_MAX_PART_SIZE);

        let fits = plan(16 * MIB, 4, STORE_MIN_PART_SIZE, STORE_MAX_PART_SIZE);
        assert_eq!(fits.part_size, 16 * MIB);
    }

    #[test]
    fn zero_concurrency_uses_default() {
        assert_eq!(
            plan(8 * MIB, 0, STORE_MIN_PART_SIZE, STORE_MAX_PART_SIZE),
            PartPlan {
                part_size: 8 * MIB,
                concurrency: 4
            }
        );
    }

    proptest! {
        #[test]
        fn plan_is_pure_and_bounded(
            part_size in any::<u64>(),
            concurrency in 0_usize..128,
            min in 1_u64..(64 * MIB),
            span in 0_u64..(64 * MIB),
        ) {
            let max = min + span;
            let first = plan(part_size, concurrency, min, max);
            let second = plan(part_size, concurrency, min, max);
            prop_assert_eq!(first, second);
            prop_assert!(first.part_size >= min && first.part_size <= max);
            prop_assert!(first.concurrency > 0);
        }
    }
}

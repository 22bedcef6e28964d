pub const fn is_aligned(value: usize, alignment_size: usize) -> bool {
    value % alignment_size == 0
}

pub const fn is_power_of_2(value: usize) -> bool {
    value > 0 && (value & (value - 1)) == 0
}

pub const fn round_up(value: usize, alignment_size: usize) -> usize {
    ((value + alignment_size - 1) / alignment_size) * alignment_size
}

pub const fn round_down(value: usize, alignment_size: usize) -> usize {
    (value / alignment_size) * alignment_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_to_alignment() {
        assert_eq!(round_up(0, 32), 0);
        assert_eq!(round_up(1, 32), 32);
        assert_eq!(round_up(32, 32), 32);
        assert_eq!(round_up(33, 32), 64);
        assert_eq!(round_up(17, 32), 32);
    }

    #[test]
    fn round_down_to_alignment() {
        assert_eq!(round_down(0, 32), 0);
        assert_eq!(round_down(31, 32), 0);
        assert_eq!(round_down(32, 32), 32);
        assert_eq!(round_down(65, 32), 64);
    }

    #[test]
    fn alignment_predicates() {
        assert!(is_aligned(64, 32));
        assert!(!is_aligned(48, 32));
        assert!(is_power_of_2(32));
        assert!(!is_power_of_2(0));
        assert!(!is_power_of_2(48));
    }
}

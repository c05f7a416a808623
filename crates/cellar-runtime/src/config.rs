//! Tunables for the heap: the pool size-class table and the collector thresholds.

/// Allocation unit width of every pool is rounded up to this.
pub const UNIT_ALIGN: usize = 16;

/// One row of the size-class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    /// Width of one allocation unit, in bytes.
    pub width: usize,
    /// How many units a fresh segment carries.
    pub units_per_segment: usize,
}

impl PoolSpec {
    pub const fn new(width: usize, units_per_segment: usize) -> Self {
        Self {
            width,
            units_per_segment,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Graduated data-block classes, ascending by width. Requests larger than the last one are
    /// served by a direct system allocation.
    pub size_classes: Vec<PoolSpec>,
    /// Units per segment for the node-header pool.
    pub node_units_per_segment: usize,
    /// Units per segment for the level-record pool.
    pub level_units_per_segment: usize,
    /// Bytes of data blocks that may be handed out before a collection is requested.
    pub ballast: usize,
    /// Maximum entries in the gray queue before marking falls back to rescanning segments.
    pub mark_queue_limit: usize,
    pub gc_enabled: bool,
}

const fn graduated(step: usize, units: usize) -> PoolSpec {
    PoolSpec::new(step * 16, units)
}

const BIG: usize = 1024;

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            size_classes: vec![
                graduated(1, 256),
                graduated(2, 512),
                graduated(3, 1024),
                graduated(4, 512),
                graduated(5, 256),
                graduated(6, 128),
                graduated(7, 128),
                graduated(8, 64),
                graduated(9, 64),
                graduated(10, 64),
                graduated(12, 32),
                graduated(14, 32),
                graduated(16, 64),
                graduated(20, 32),
                graduated(24, 16),
                graduated(28, 16),
                graduated(32, 8),
                PoolSpec::new(BIG, 16),
                PoolSpec::new(BIG * 2, 8),
                PoolSpec::new(BIG * 3, 4),
                PoolSpec::new(BIG * 4, 4),
            ],
            node_units_per_segment: 4096,
            level_units_per_segment: 128,
            ballast: 3_000_000,
            mark_queue_limit: 1 << 16,
            gc_enabled: true,
        }
    }
}

impl HeapConfig {
    /// Multiplies every segment size by `scale`, keeping at least one unit per segment.
    pub fn scale_segments(mut self, scale: f64) -> Self {
        let scaled = |units: usize| ((units as f64 * scale).round() as usize).max(1);

        for spec in self.size_classes.iter_mut() {
            spec.units_per_segment = scaled(spec.units_per_segment);
        }

        self.node_units_per_segment = scaled(self.node_units_per_segment);
        self.level_units_per_segment = scaled(self.level_units_per_segment);
        self
    }

    /// A configuration with tiny segments, useful to exercise segment growth in tests.
    pub fn small() -> Self {
        Self {
            ballast: 64 * 1024,
            ..Self::default()
        }
        .scale_segments(1.0 / 64.0)
    }

    /// Largest request served from a pool rather than the system allocator.
    pub fn largest_class(&self) -> usize {
        self.size_classes.last().map(|spec| spec.width).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_ascending() {
        let config = HeapConfig::default();
        let widths = config
            .size_classes
            .iter()
            .map(|spec| spec.width)
            .collect::<Vec<_>>();

        assert!(widths.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(widths.iter().all(|width| width % UNIT_ALIGN == 0));
        assert_eq!(config.largest_class(), 4096);
    }

    #[test]
    fn scaling_keeps_one_unit() {
        let config = HeapConfig::default().scale_segments(0.0);
        assert!(config.size_classes.iter().all(|spec| spec.units_per_segment == 1));
        assert_eq!(config.node_units_per_segment, 1);
    }
}

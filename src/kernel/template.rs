use rand::rngs::StdRng;
use rand::Rng;

/// The three commands a workload template may schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Calculate,
    Io,
    Fork,
}

impl Operation {
    pub fn parse(token: &str) -> Option<Operation> {
        match token {
            "CALCULATE" => Some(Operation::Calculate),
            "IO" => Some(Operation::Io),
            "FORK" => Some(Operation::Fork),
            _ => None,
        }
    }
}

/// Immutable workload blueprint. One semaphore (and so one critical-section
/// domain) exists per template; `index` identifies it.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub memory_required_mb: u64,
    pub index: usize,
    pub sections: Vec<TemplateSection>,
}

/// A run of template lines between critical-section markers.
#[derive(Debug, Clone)]
pub struct TemplateSection {
    pub critical: bool,
    pub op_sets: Vec<TemplateOpSet>,
}

/// One template line: an operation plus the cycle range a burst is sampled
/// from. Fork bursts are always a single cycle.
#[derive(Debug, Clone)]
pub struct TemplateOpSet {
    pub operation: Operation,
    pub min_cycles: u32,
    pub max_cycles: u32,
}

impl TemplateOpSet {
    /// Samples a concrete burst length from `[min, max)`.
    pub fn sample_cycles(&self, rng: &mut StdRng) -> u32 {
        if self.operation == Operation::Fork {
            return 1;
        }
        rng.gen_range(self.min_cycles..self.max_cycles)
    }
}

impl Template {
    pub fn new(name: impl Into<String>, memory_required_mb: u64, sections: Vec<TemplateSection>) -> Template {
        Template {
            name: name.into(),
            memory_required_mb,
            index: 0,
            sections,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("CALCULATE"), Some(Operation::Calculate));
        assert_eq!(Operation::parse("IO"), Some(Operation::Io));
        assert_eq!(Operation::parse("FORK"), Some(Operation::Fork));
        assert_eq!(Operation::parse("calculate"), None);
        assert_eq!(Operation::parse("WRITE"), None);
    }

    #[test]
    fn test_sample_cycles_within_half_open_range() {
        let op_set = TemplateOpSet {
            operation: Operation::Calculate,
            min_cycles: 5,
            max_cycles: 8,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let cycles = op_set.sample_cycles(&mut rng);
            assert!((5..8).contains(&cycles));
        }
    }

    #[test]
    fn test_fork_burst_is_one_cycle() {
        let op_set = TemplateOpSet {
            operation: Operation::Fork,
            min_cycles: 0,
            max_cycles: 0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(op_set.sample_cycles(&mut rng), 1);
    }
}

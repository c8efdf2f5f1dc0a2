use std::collections::VecDeque;

use rand::rngs::StdRng;

use super::template::{Operation, Template};

/// The mutable instruction stream owned by one PCB. Instantiated from a
/// template by sampling a concrete burst length for every operation set.
#[derive(Debug, Clone)]
pub struct Process {
    sections: VecDeque<Section>,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub critical: bool,
    pub op_sets: VecDeque<OperationSet>,
}

#[derive(Debug, Clone)]
pub struct OperationSet {
    pub operation: Operation,
    pub cycles: u32,
}

impl OperationSet {
    pub fn progress_one_cycle(&mut self) {
        self.cycles -= 1;
    }
}

impl Process {
    pub fn instantiate(template: &Template, rng: &mut StdRng) -> Process {
        let sections = template
            .sections
            .iter()
            .map(|t_section| Section {
                critical: t_section.critical,
                op_sets: t_section
                    .op_sets
                    .iter()
                    .map(|t_op_set| OperationSet {
                        operation: t_op_set.operation,
                        cycles: t_op_set.sample_cycles(rng),
                    })
                    .collect(),
            })
            .collect();

        Process { sections }
    }

    /// Builds a child's instruction stream at a fork point: a fully owned
    /// copy of the parent's current section (the operation sets remaining
    /// after the FORK) followed by all of the parent's remaining sections.
    pub fn fork_from(parent: &Process, current_section: &Section) -> Process {
        let mut sections = VecDeque::with_capacity(parent.sections.len() + 1);
        sections.push_back(current_section.clone());
        sections.extend(parent.sections.iter().cloned());
        Process { sections }
    }

    pub fn next_section(&mut self) -> Option<Section> {
        self.sections.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::kernel::template::{TemplateOpSet, TemplateSection};

    use super::*;

    fn template() -> Template {
        Template::new(
            "worker",
            4,
            vec![
                TemplateSection {
                    critical: false,
                    op_sets: vec![
                        TemplateOpSet { operation: Operation::Calculate, min_cycles: 3, max_cycles: 6 },
                        TemplateOpSet { operation: Operation::Fork, min_cycles: 0, max_cycles: 0 },
                    ],
                },
                TemplateSection {
                    critical: true,
                    op_sets: vec![TemplateOpSet { operation: Operation::Io, min_cycles: 2, max_cycles: 4 }],
                },
            ],
        )
    }

    #[test]
    fn test_instantiate_samples_every_op_set() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut process = Process::instantiate(&template(), &mut rng);

        let first = process.next_section().unwrap();
        assert!(!first.critical);
        assert_eq!(first.op_sets.len(), 2);
        assert!((3..6).contains(&first.op_sets[0].cycles));
        assert_eq!(first.op_sets[1].cycles, 1);

        let second = process.next_section().unwrap();
        assert!(second.critical);
        assert!(process.next_section().is_none());
    }

    #[test]
    fn test_fork_copy_is_independent_of_parent() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut parent = Process::instantiate(&template(), &mut rng);

        let mut current = parent.next_section().unwrap();
        current.op_sets.pop_front(); // past the FORK point

        let mut child = Process::fork_from(&parent, &current);

        // Mutating the child must not affect the parent's pending sections.
        let mut child_first = child.next_section().unwrap();
        if let Some(op_set) = child_first.op_sets.front_mut() {
            op_set.cycles = 0;
        }

        let parent_critical = parent.next_section().unwrap();
        assert!(parent_critical.critical);
        assert!(parent_critical.op_sets[0].cycles >= 2);

        // Child carries the parent's remaining sections after its fork copy.
        assert!(child.next_section().unwrap().critical);
        assert!(child.next_section().is_none());
    }
}

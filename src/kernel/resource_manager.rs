use std::collections::HashMap;

use super::Pid;

/// Fixed-length vector over the system's resource types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceVector(Vec<u32>);

impl ResourceVector {
    pub fn zeros(num_types: usize) -> ResourceVector {
        ResourceVector(vec![0; num_types])
    }

    pub fn uniform(num_types: usize, value: u32) -> ResourceVector {
        ResourceVector(vec![value; num_types])
    }

    pub fn from_values(values: Vec<u32>) -> ResourceVector {
        ResourceVector(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> u32 {
        self.0[i]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }

    pub fn less_than_or_equal_to(&self, other: &ResourceVector) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector(self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect())
    }

    pub fn subtract(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector(self.0.iter().zip(&other.0).map(|(a, b)| a - b).collect())
    }
}

/// Banker's-algorithm admission control over a fixed pool of unnamed
/// resources. A request is granted only when the resulting state is
/// provably deadlock-free; unsafe requests are rolled back atomically.
pub struct ResourceManager {
    capacity: ResourceVector,
    available: ResourceVector,
    max_demand: HashMap<Pid, ResourceVector>,
    allocation: HashMap<Pid, ResourceVector>,
    need: HashMap<Pid, ResourceVector>,
}

impl ResourceManager {
    pub fn new(capacity: ResourceVector) -> ResourceManager {
        ResourceManager {
            available: capacity.clone(),
            capacity,
            max_demand: HashMap::new(),
            allocation: HashMap::new(),
            need: HashMap::new(),
        }
    }

    pub fn num_types(&self) -> usize {
        self.capacity.len()
    }

    pub fn available(&self) -> &ResourceVector {
        &self.available
    }

    /// Registers a process with its declared maximum demand; nothing is
    /// allocated yet, so `need == max`.
    pub fn add_process(&mut self, pid: Pid, max_demand: ResourceVector) {
        self.allocation.insert(pid, ResourceVector::zeros(max_demand.len()));
        self.need.insert(pid, max_demand.clone());
        self.max_demand.insert(pid, max_demand);
    }

    /// Remaining need for one process, `max - allocation`.
    pub fn need_of(&self, pid: Pid) -> Option<&ResourceVector> {
        self.need.get(&pid)
    }

    /// Attempts to grant `request`. Denied without side effect when the
    /// request exceeds the declared need (protocol violation), exceeds the
    /// current supply, or would leave the system in an unsafe state.
    pub fn request_resources(&mut self, pid: Pid, request: &ResourceVector) -> bool {
        let need = match self.need.get(&pid) {
            Some(need) => need.clone(),
            None => return false,
        };
        if !request.less_than_or_equal_to(&need) {
            return false;
        }
        if !request.less_than_or_equal_to(&self.available) {
            return false;
        }

        let available_old = self.available.clone();
        let allocation_old = self.allocation[&pid].clone();

        // Tentatively apply the grant, then check safety.
        self.available = available_old.subtract(request);
        self.allocation.insert(pid, allocation_old.add(request));
        self.need.insert(pid, need.subtract(request));

        if self.safe_state() {
            true
        } else {
            self.available = available_old;
            self.allocation.insert(pid, allocation_old);
            self.need.insert(pid, need);
            false
        }
    }

    pub fn release_resources(&mut self, pid: Pid, releasing: &ResourceVector) {
        self.available = self.available.add(releasing);
        if let Some(allocation) = self.allocation.get_mut(&pid) {
            *allocation = allocation.subtract(releasing);
        }
        if let Some(need) = self.need.get_mut(&pid) {
            *need = need.add(releasing);
        }
    }

    /// Drops a process, reclaiming its entire current allocation.
    pub fn remove_process(&mut self, pid: Pid) {
        self.max_demand.remove(&pid);
        self.need.remove(&pid);
        if let Some(allocated) = self.allocation.remove(&pid) {
            self.available = self.available.add(&allocated);
        }
    }

    // Safety check: find any finish order in which every tracked process
    // could run to completion with the work currently available.
    fn safe_state(&self) -> bool {
        let mut work = self.available.clone();
        let mut finish: Vec<Pid> = self.max_demand.keys().copied().collect();

        loop {
            let candidate = finish
                .iter()
                .position(|pid| self.need[pid].less_than_or_equal_to(&work));
            match candidate {
                Some(i) => {
                    let pid = finish.swap_remove(i);
                    work = work.add(&self.allocation[&pid]);
                }
                None => break,
            }
        }
        finish.is_empty()
    }

    /// Conservation invariant: available plus everything allocated equals
    /// total capacity at every quiescent point.
    pub fn conserved(&self) -> bool {
        let mut total = self.available.clone();
        for allocation in self.allocation.values() {
            total = total.add(allocation);
        }
        total == self.capacity
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::memory::Word;
use super::Pid;

/// How a process exchanges data with its forked children. Assigned at
/// creation and inherited by children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcMode {
    MessagePassing,
    OrdinaryPipe,
}

#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub sender: Pid,
    pub contents: Word,
}

/// Per-recipient FIFO mailboxes.
pub struct MessagePasser {
    mailboxes: Mutex<HashMap<Pid, VecDeque<Message>>>,
}

impl MessagePasser {
    pub fn new() -> MessagePasser {
        MessagePasser {
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    pub fn send(&self, recipient: Pid, message: Message) {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes.entry(recipient).or_default().push_back(message);
    }

    /// Pops at most one pending message for the recipient.
    pub fn receive(&self, recipient: Pid) -> Option<Message> {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes.get_mut(&recipient).and_then(|queue| queue.pop_front())
    }

    /// Drops a terminated recipient's mailbox and anything still queued.
    pub fn remove_mailbox(&self, recipient: Pid) {
        self.mailboxes.lock().unwrap().remove(&recipient);
    }
}

impl Default for MessagePasser {
    fn default() -> MessagePasser {
        MessagePasser::new()
    }
}

/// Single-writer/single-reader FIFO bound to one parent→child pair. Writes
/// from any pid other than the parent and reads by any pid other than the
/// child are ignored.
pub struct OrdinaryPipe {
    parent: Pid,
    child: Pid,
    buffer: Mutex<VecDeque<Word>>,
}

impl OrdinaryPipe {
    fn new(parent: Pid, child: Pid) -> OrdinaryPipe {
        OrdinaryPipe {
            parent,
            child,
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    pub fn write(&self, writer: Pid, contents: Word) {
        if writer == self.parent {
            self.buffer.lock().unwrap().push_back(contents);
        }
    }

    pub fn read(&self, reader: Pid) -> Option<Word> {
        if reader == self.child {
            self.buffer.lock().unwrap().pop_front()
        } else {
            None
        }
    }
}

/// Creates and looks up pipes, keyed by the reader (child) pid.
pub struct PipeManager {
    pipes_by_reader: Mutex<HashMap<Pid, Arc<OrdinaryPipe>>>,
}

impl PipeManager {
    pub fn new() -> PipeManager {
        PipeManager {
            pipes_by_reader: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_pipe(&self, parent: Pid, child: Pid) -> Arc<OrdinaryPipe> {
        let pipe = Arc::new(OrdinaryPipe::new(parent, child));
        self.pipes_by_reader.lock().unwrap().insert(child, pipe.clone());
        pipe
    }

    pub fn retrieve_pipe(&self, reader: Pid) -> Option<Arc<OrdinaryPipe>> {
        self.pipes_by_reader.lock().unwrap().get(&reader).cloned()
    }

    pub fn remove_pipe(&self, reader: Pid) {
        self.pipes_by_reader.lock().unwrap().remove(&reader);
    }
}

impl Default for PipeManager {
    fn default() -> PipeManager {
        PipeManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(address: u64) -> Word {
        Word { address, spill: None }
    }

    #[test]
    fn test_message_passer_fifo_per_recipient() {
        let passer = MessagePasser::new();
        passer.send(5, Message { sender: 1, contents: word(10) });
        passer.send(5, Message { sender: 2, contents: word(20) });
        passer.send(6, Message { sender: 1, contents: word(30) });

        let first = passer.receive(5).unwrap();
        assert_eq!(first.sender, 1);
        assert_eq!(first.contents, word(10));
        assert_eq!(passer.receive(5).unwrap().sender, 2);
        assert!(passer.receive(5).is_none());
        assert_eq!(passer.receive(6).unwrap().contents, word(30));
    }

    #[test]
    fn test_pipe_enforces_endpoints() {
        let manager = PipeManager::new();
        let pipe = manager.create_pipe(1, 2);

        pipe.write(3, word(99)); // not the parent; dropped
        pipe.write(1, word(7));

        assert!(pipe.read(1).is_none()); // not the child
        assert_eq!(pipe.read(2), Some(word(7)));
        assert!(pipe.read(2).is_none());
    }

    #[test]
    fn test_pipe_lookup_by_reader() {
        let manager = PipeManager::new();
        manager.create_pipe(1, 2);
        assert!(manager.retrieve_pipe(2).is_some());
        assert!(manager.retrieve_pipe(1).is_none());
        manager.remove_pipe(2);
        assert!(manager.retrieve_pipe(2).is_none());
    }
}

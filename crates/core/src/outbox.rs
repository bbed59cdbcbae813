/// Holds at most one outbound message while no connection is ready.
///
/// Putting a message into an occupied slot overwrites it: only the latest
/// message survives, and the replaced one is handed back to the caller.
#[derive(Debug)]
pub struct PendingSlot<T> {
    slot: Option<T>,
}

impl<T> PendingSlot<T> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Store `item`, returning the message it replaced.
    pub fn put(&mut self, item: T) -> Option<T> {
        self.slot.replace(item)
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn peek(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Listener lists with explicit subscription handles.

/// Handle returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<E> = Box<dyn FnMut(&E)>;

/// Ordered list of listeners for events of type `E`.
pub struct EventBus<E> {
    next: u64,
    listeners: Vec<(Subscription, Listener<E>)>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&E) + 'static,
    {
        let handle = Subscription(self.next);
        self.next += 1;
        self.listeners.push((handle, Box::new(callback)));
        handle
    }

    /// Returns `false` if the handle was unknown (already removed).
    pub fn unsubscribe(&mut self, handle: Subscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    /// Calls every listener in subscription order. Returns whether anyone
    /// was listening.
    pub fn emit(&mut self, event: &E) -> bool {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
        !self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

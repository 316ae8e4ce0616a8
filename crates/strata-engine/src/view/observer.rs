//! Weak subscriber lists.
//!
//! Subscribers are held weakly and may unsubscribe (or be dropped) while a
//! notification is running. Removal during a notification leaves a
//! tombstone; the list is compacted once the outermost notification
//! returns.

use std::cell::RefCell;
use std::rc::Weak;

use kurbo::Rect;

use super::ItemId;

/// Receives scene change notifications.
pub trait SceneObserver {
    fn item_added(&self, _id: ItemId) {}

    fn item_removed(&self, _id: ItemId) {}

    /// The visible world rectangle changed.
    fn viewport_changed(&self, _visible: Rect) {}
}

/// Returned by [`Observable::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Subscription(u64);

struct Subscriber<T: ?Sized> {
    id: u64,
    target: Weak<T>,
}

struct Subscribers<T: ?Sized> {
    slots: Vec<Option<Subscriber<T>>>,
    next_id: u64,
    /// Nesting depth of running notifications.
    depth: u32,
}

impl<T: ?Sized> Subscribers<T> {
    fn compact(&mut self) {
        self.slots
            .retain(|s| s.as_ref().is_some_and(|s| s.target.strong_count() > 0));
    }
}

/// List of weak subscribers of type `T`.
pub struct Observable<T: ?Sized> {
    inner: RefCell<Subscribers<T>>,
}

impl<T: ?Sized> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends a notification even if a subscriber panics.
struct NotifyScope<'a, T: ?Sized>(&'a RefCell<Subscribers<T>>);

impl<T: ?Sized> Drop for NotifyScope<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.0.borrow_mut();
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.compact();
        }
    }
}

impl<T: ?Sized> Observable<T> {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Subscribers { slots: Vec::new(), next_id: 1, depth: 0 }),
        }
    }

    pub fn subscribe(&self, target: Weak<T>) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.push(Some(Subscriber { id, target }));
        Subscription(id)
    }

    /// Returns whether the subscription was still active.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|s| s.id == subscription.0))
        else {
            return false;
        };
        *slot = None;
        if inner.depth == 0 {
            inner.compact();
        }
        true
    }

    /// Live subscribers.
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .slots
            .iter()
            .flatten()
            .filter(|s| s.target.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` on every live subscriber present when the notification
    /// starts. Subscribers may subscribe or unsubscribe from inside `f`.
    pub fn notify<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        let count = {
            let mut inner = self.inner.borrow_mut();
            inner.depth += 1;
            inner.slots.len()
        };
        let _scope = NotifyScope(&self.inner);

        for i in 0..count {
            let target = {
                let inner = self.inner.borrow();
                inner.slots.get(i).and_then(|s| s.as_ref()).map(|s| s.target.clone())
            };
            match target.and_then(|t| t.upgrade()) {
                Some(target) => f(&*target),
                None => {
                    if let Some(slot) = self.inner.borrow_mut().slots.get_mut(i) {
                        *slot = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    trait Listener {
        fn ping(&self);
    }

    #[derive(Default)]
    struct Counter {
        hits: Cell<u32>,
    }

    impl Listener for Counter {
        fn ping(&self) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    /// Unsubscribes itself on the first ping.
    struct OneShot {
        list: Rc<Observable<dyn Listener>>,
        subscription: Cell<Option<Subscription>>,
        hits: Cell<u32>,
    }

    impl Listener for OneShot {
        fn ping(&self) {
            self.hits.set(self.hits.get() + 1);
            if let Some(s) = self.subscription.take() {
                assert!(self.list.unsubscribe(s));
            }
        }
    }

    fn weak<T: Listener + 'static>(rc: &Rc<T>) -> Weak<dyn Listener> {
        Rc::downgrade(rc) as Weak<dyn Listener>
    }

    // ── delivery ─────────────────────────────────────────────────────────

    #[test]
    fn notifies_live_subscribers_and_prunes_dead_ones() {
        let list: Observable<dyn Listener> = Observable::new();
        let a = Rc::new(Counter::default());
        let b = Rc::new(Counter::default());
        list.subscribe(weak(&a));
        list.subscribe(weak(&b));
        drop(b);

        list.notify(|l| l.ping());
        assert_eq!(a.hits.get(), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.inner.borrow().slots.len(), 1);
    }

    #[test]
    fn unsubscribe_outside_notification_compacts_immediately() {
        let list: Observable<dyn Listener> = Observable::new();
        let a = Rc::new(Counter::default());
        let s = list.subscribe(weak(&a));
        assert!(list.unsubscribe(s));
        assert!(!list.unsubscribe(s));
        assert!(list.inner.borrow().slots.is_empty());
        list.notify(|l| l.ping());
        assert_eq!(a.hits.get(), 0);
    }

    // ── reentrancy ───────────────────────────────────────────────────────

    #[test]
    fn subscriber_can_unsubscribe_during_notification() {
        let list: Rc<Observable<dyn Listener>> = Rc::new(Observable::new());
        let shot = Rc::new(OneShot {
            list: Rc::clone(&list),
            subscription: Cell::new(None),
            hits: Cell::new(0),
        });
        let after = Rc::new(Counter::default());
        let s = list.subscribe(weak(&shot));
        shot.subscription.set(Some(s));
        list.subscribe(weak(&after));

        list.notify(|l| l.ping());
        assert_eq!(shot.hits.get(), 1);
        // the subscriber after the tombstone still ran
        assert_eq!(after.hits.get(), 1);
        assert_eq!(list.inner.borrow().slots.len(), 1);

        list.notify(|l| l.ping());
        assert_eq!(shot.hits.get(), 1);
        assert_eq!(after.hits.get(), 2);
    }

    #[test]
    fn subscribers_added_during_notification_wait_for_the_next_one() {
        let list: Observable<dyn Listener> = Observable::new();
        let a = Rc::new(Counter::default());
        let late = Rc::new(Counter::default());
        list.subscribe(weak(&a));

        let mut added = false;
        list.notify(|l| {
            l.ping();
            if !added {
                list.subscribe(weak(&late));
                added = true;
            }
        });
        assert_eq!(late.hits.get(), 0);

        list.notify(|l| l.ping());
        assert_eq!(late.hits.get(), 1);
        assert_eq!(a.hits.get(), 2);
    }
}

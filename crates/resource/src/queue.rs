//! Bounded FIFO of requests owned by a resource.
//!
//! Requests enter at the tail and leave from the head. Entries have no
//! identity beyond their position; lookups compare request handles.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::request::Request;

/// Bounded FIFO of pending requests.
#[derive(Debug)]
pub struct RequestQueue {
    items: VecDeque<Request>,
    capacity: usize,
}

impl RequestQueue {
    /// Create an empty queue holding at most `capacity` requests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Maximum number of queued requests
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `request`, returning the new length.
    ///
    /// Fails with [`Error::QueueFull`] instead of growing past capacity.
    pub fn push(&mut self, request: Request) -> Result<usize> {
        if self.items.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        self.items.push_back(request);
        Ok(self.items.len())
    }

    /// Remove and return the head.
    pub fn shift(&mut self) -> Option<Request> {
        self.items.pop_front()
    }

    /// The head, if any
    #[must_use]
    pub fn front(&self) -> Option<&Request> {
        self.items.front()
    }

    /// The request at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Request> {
        self.items.get(index)
    }

    /// Position of `request` in the queue
    #[must_use]
    pub fn position(&self, request: &Request) -> Option<usize> {
        self.items.iter().position(|queued| queued.ptr_eq(request))
    }

    /// Evict the entry at `index`, closing the gap.
    pub fn remove(&mut self, index: usize) -> Option<Request> {
        self.items.remove(index)
    }

    /// Iterate from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestKind, RequestOptions};
    use crate::resource::{Resource, ResourceOptions};

    fn request(resource: &Resource) -> Request {
        Request::init(RequestOptions::new(RequestKind::User).resource(resource)).unwrap()
    }

    #[test]
    fn fifo_order() {
        let resource = Resource::init(ResourceOptions::default()).unwrap();
        let (a, b, c) = (request(&resource), request(&resource), request(&resource));

        let mut queue = RequestQueue::new(4);
        assert_eq!(queue.push(a.clone()).unwrap(), 1);
        assert_eq!(queue.push(b.clone()).unwrap(), 2);
        assert_eq!(queue.push(c.clone()).unwrap(), 3);

        assert!(queue.shift().unwrap().ptr_eq(&a));
        assert!(queue.front().unwrap().ptr_eq(&b));
        assert_eq!(queue.position(&c), Some(1));
        assert_eq!(queue.position(&a), None);
    }

    #[test]
    fn overflow_is_an_error() {
        let resource = Resource::init(ResourceOptions::default()).unwrap();
        let mut queue = RequestQueue::new(1);
        queue.push(request(&resource)).unwrap();

        let err = queue.push(request(&resource)).unwrap_err();
        assert_eq!(err, Error::QueueFull { capacity: 1 });
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_closes_gap() {
        let resource = Resource::init(ResourceOptions::default()).unwrap();
        let (a, b, c) = (request(&resource), request(&resource), request(&resource));
        let mut queue = RequestQueue::new(8);
        for r in [&a, &b, &c] {
            queue.push(r.clone()).unwrap();
        }

        assert!(queue.remove(1).unwrap().ptr_eq(&b));
        assert!(queue.get(1).unwrap().ptr_eq(&c));
        assert_eq!(queue.len(), 2);
        assert!(queue.remove(5).is_none());
    }
}

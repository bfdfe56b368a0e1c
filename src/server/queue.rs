//! Bounded outbound ASDU queue.

use std::collections::VecDeque;

use crate::types::Asdu;

/// FIFO of ASDUs waiting for a send window. When full, the oldest entry is
/// dropped to make room for the new one.
#[derive(Debug)]
pub(crate) struct AsduQueue {
    items: VecDeque<Asdu>,
    capacity: usize,
}

impl AsduQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Append `asdu`, returning the entry dropped to make room.
    pub(crate) fn push(&mut self, asdu: Asdu) -> Option<Asdu> {
        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(asdu);
        dropped
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Asdu> {
        self.items.pop_front()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ConnectionParameters;
    use crate::types::{Cot, InformationElement, InformationObject};

    fn asdu(ioa: u32) -> Asdu {
        let mut asdu = Asdu::new(&ConnectionParameters::default(), Cot::Spontaneous, 1);
        assert!(asdu.add_information_object(&InformationObject::new(
            ioa,
            InformationElement::EndOfInitialization(0)
        )));
        asdu
    }

    fn first_address(asdu: &Asdu) -> u32 {
        asdu.element(0).unwrap().address
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = AsduQueue::new(10);
        for ioa in 1..=3 {
            assert!(queue.push(asdu(ioa)).is_none());
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().map(|a| first_address(&a)), Some(1));
        assert_eq!(queue.pop().map(|a| first_address(&a)), Some(2));
        assert_eq!(queue.pop().map(|a| first_address(&a)), Some(3));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut queue = AsduQueue::new(2);
        queue.push(asdu(1));
        queue.push(asdu(2));

        let dropped = queue.push(asdu(3)).unwrap();
        assert_eq!(first_address(&dropped), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|a| first_address(&a)), Some(2));
        assert_eq!(queue.pop().map(|a| first_address(&a)), Some(3));
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let mut queue = AsduQueue::new(0);
        queue.push(asdu(1));
        assert!(queue.push(asdu(2)).is_some());
        assert_eq!(queue.len(), 1);
    }
}

use std::collections::VecDeque;

//items that a newer item may replace when the buffer is full
//(sensor readings, joystick snapshots, motor setpoints). anything that returns
//false here is never evicted
pub trait Supersede{
    fn is_supersedable(&self) -> bool;
}

//a slot in the ring buffer containing data and its epoch
struct Slot<T>{
    data: T,
    epoch: u64, //epoch when this slot was written
}

//what happened to a push
#[derive(Debug, PartialEq)]
pub enum PushOutcome<T>{
    //stored without losing anything
    Stored(u64),
    //stored, the oldest supersedable item was dropped to make room
    Evicted{ epoch: u64, dropped: T },
    //buffer full of protected items, the incoming supersedable item was dropped
    Rejected(T),
}

impl<T> PushOutcome<T>{
    pub fn epoch(&self) -> Option<u64>{
        match self{
            PushOutcome::Stored(e) => Some(*e),
            PushOutcome::Evicted{ epoch, .. } => Some(*epoch),
            PushOutcome::Rejected(_) => None,
        }
    }
}

//bounded FIFO with per-slot epochs and freshness bias: when full, the oldest
//supersedable item goes first. protected items are never dropped, so the buffer
//may temporarily hold more than `capacity` of them
pub struct RingBuffer<T>{
    buffer: VecDeque<Slot<T>>,
    write_epoch: u64, //inc on every stored push
    capacity: usize,
}

impl<T: Supersede> RingBuffer<T>{
    //creating a new ring buffer with given capacity
    pub fn new(capacity: usize) -> Self{
        assert!(capacity > 0, "ring buffer capacity must be greater than 0");

        RingBuffer{
            buffer: VecDeque::with_capacity(capacity),
            write_epoch: 0,
            capacity,
        }
    }

    fn next_epoch(&mut self) -> u64{
        self.write_epoch += 1;
        self.write_epoch
    }

    //push item to the back, evicting per the freshness policy when full
    pub fn push(&mut self, item: T) -> PushOutcome<T>{
        if self.buffer.len() < self.capacity{
            let epoch = self.next_epoch();
            self.buffer.push_back(Slot{ data: item, epoch });
            return PushOutcome::Stored(epoch);
        }

        //full -> look for the oldest item we are allowed to drop
        let victim = self.buffer.iter().position(|s| s.data.is_supersedable());
        match victim{
            Some(idx) =>{
                let dropped = self.buffer.remove(idx).map(|s| s.data);
                let epoch = self.next_epoch();
                self.buffer.push_back(Slot{ data: item, epoch });
                match dropped{
                    Some(dropped) => PushOutcome::Evicted{ epoch, dropped },
                    None => PushOutcome::Stored(epoch),
                }
            }
            None if item.is_supersedable() => PushOutcome::Rejected(item),
            None =>{
                //protected item into a buffer of protected items, grow
                let epoch = self.next_epoch();
                self.buffer.push_back(Slot{ data: item, epoch });
                PushOutcome::Stored(epoch)
            }
        }
    }

    //put an item back at the front (it failed to send). a supersedable item is
    //dropped instead when the buffer is already full, since everything queued
    //behind it is newer
    pub fn requeue_front(&mut self, item: T) -> Result<(), T>{
        if self.buffer.len() >= self.capacity && item.is_supersedable(){
            return Err(item);
        }
        let epoch = self.buffer.front().map(|s| s.epoch).unwrap_or(self.write_epoch);
        self.buffer.push_front(Slot{ data: item, epoch });
        Ok(())
    }

    //pop the oldest item from buffer
    pub fn pop(&mut self) -> Option<T>{
        self.buffer.pop_front().map(|s| s.data)
    }

    //true if any queued item matches
    pub fn any<F: Fn(&T) -> bool>(&self, f: F) -> bool{
        self.buffer.iter().any(|s| f(&s.data))
    }

    //oldest first, without removing
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_{
        self.buffer.iter().map(|s| &s.data)
    }

    //take everything, oldest first
    pub fn drain(&mut self) -> Vec<T>{
        self.buffer.drain(..).map(|s| s.data).collect()
    }

    pub fn len(&self) -> usize{
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool{
        self.buffer.is_empty()
    }
}

//Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Item{
        Reading(i32),
        Critical(i32),
    }

    impl Supersede for Item{
        fn is_supersedable(&self) -> bool{
            matches!(self, Item::Reading(_))
        }
    }

    use Item::{Critical, Reading};

    #[test]
    fn test_push_pop_fifo() {
        let mut rb = RingBuffer::new(5);

        rb.push(Reading(10));
        rb.push(Reading(20));
        rb.push(Critical(30));

        assert_eq!(rb.pop(), Some(Reading(10)));
        assert_eq!(rb.pop(), Some(Reading(20)));
        assert_eq!(rb.pop(), Some(Critical(30)));
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn test_epoch_increment() {
        let mut rb = RingBuffer::new(5);

        let e1 = rb.push(Reading(10)).epoch();
        let e2 = rb.push(Reading(20)).epoch();

        assert_eq!(e1, Some(1));
        assert_eq!(e2, Some(2));
    }

    #[test]
    fn test_overflow_discards_old() {
        let mut rb = RingBuffer::new(3);

        rb.push(Reading(1));
        rb.push(Reading(2));
        rb.push(Reading(3));
        assert_eq!(rb.len(), 3);

        let outcome = rb.push(Reading(4)); //discard 1
        assert_eq!(outcome, PushOutcome::Evicted{ epoch: 4, dropped: Reading(1) });

        assert_eq!(rb.pop(), Some(Reading(2)));
        assert_eq!(rb.pop(), Some(Reading(3)));
        assert_eq!(rb.pop(), Some(Reading(4)));
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn test_critical_survives_eviction() {
        let mut rb = RingBuffer::new(3);

        rb.push(Critical(0));
        for i in 1..10{
            rb.push(Reading(i));
        }

        assert_eq!(rb.len(), 3);
        assert_eq!(rb.drain(), vec![Critical(0), Reading(8), Reading(9)]);
    }

    #[test]
    fn test_full_of_critical() {
        let mut rb = RingBuffer::new(2);

        rb.push(Critical(1));
        rb.push(Critical(2));

        //a reading has nowhere to go
        assert_eq!(rb.push(Reading(3)), PushOutcome::Rejected(Reading(3)));

        //a critical item is never refused
        assert_eq!(rb.push(Critical(4)), PushOutcome::Stored(3));
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn test_requeue_front() {
        let mut rb = RingBuffer::new(3);
        rb.push(Reading(2));
        rb.push(Reading(3));

        let first = rb.pop().unwrap();
        rb.push(Reading(4));
        assert!(rb.requeue_front(first).is_ok());
        assert_eq!(rb.len(), 3);

        //full, a stale reading is not put back
        assert_eq!(rb.requeue_front(Reading(1)), Err(Reading(1)));
        //a critical one is
        assert!(rb.requeue_front(Critical(0)).is_ok());
        assert_eq!(rb.drain(), vec![Critical(0), Reading(2), Reading(3), Reading(4)]);
    }

    #[test]
    fn test_any() {
        let mut rb = RingBuffer::new(4);
        rb.push(Reading(1));
        assert!(!rb.any(|i| !i.is_supersedable()));
        rb.push(Critical(2));
        assert!(rb.any(|i| !i.is_supersedable()));
    }
}

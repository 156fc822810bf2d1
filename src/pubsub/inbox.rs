use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tracing::trace;
use crate::ring_buffer::{PushOutcome, RingBuffer, Supersede};

//where producers hand their events. implemented by the inbox, and by test
//doubles that just record what was emitted
pub trait EventSink<E>: Send + Sync{
    fn emit(&self, event: E);
}

//bounded many-producer / single-consumer queue. producers never block: when the
//buffer is full the oldest supersedable event is dropped
pub struct Inbox<T>{
    buffer: Mutex<RingBuffer<T>>,
    ready: Condvar,
    dropped: Mutex<u64>,
}

impl<T: Supersede + Send> Inbox<T>{
    pub fn new(capacity: usize) -> Self{
        Inbox{
            buffer: Mutex::new(RingBuffer::new(capacity)),
            ready: Condvar::new(),
            dropped: Mutex::new(0),
        }
    }

    pub fn push(&self, item: T){
        let outcome = self.buffer.lock().push(item);
        match outcome{
            PushOutcome::Stored(_) => {}
            PushOutcome::Evicted{ .. } | PushOutcome::Rejected(_) =>{
                let mut dropped = self.dropped.lock();
                *dropped += 1;
                trace!(total = *dropped, "inbox full, dropped a stale event");
            }
        }
        self.ready.notify_one();
    }

    pub fn try_recv(&self) -> Option<T>{
        self.buffer.lock().pop()
    }

    //wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T>{
        let deadline = Instant::now() + timeout;
        let mut buffer = self.buffer.lock();
        loop{
            if let Some(item) = buffer.pop(){
                return Some(item);
            }
            if self.ready.wait_until(&mut buffer, deadline).timed_out(){
                return buffer.pop();
            }
        }
    }

    //everything queued right now, oldest first
    pub fn drain(&self) -> Vec<T>{
        self.buffer.lock().drain()
    }

    pub fn len(&self) -> usize{
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool{
        self.buffer.lock().is_empty()
    }

    //events lost to backpressure since creation
    pub fn dropped(&self) -> u64{
        *self.dropped.lock()
    }
}

impl<T, E> EventSink<E> for Inbox<T>
where
    T: Supersede + Send + From<E>,
{
    fn emit(&self, event: E){
        self.push(T::from(event));
    }
}

impl<E, S: EventSink<E> + ?Sized> EventSink<E> for std::sync::Arc<S>{
    fn emit(&self, event: E){
        (**self).emit(event)
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    enum Event{
        Sensor(u32),
        Stop,
    }

    impl Supersede for Event{
        fn is_supersedable(&self) -> bool{
            matches!(self, Event::Sensor(_))
        }
    }

    #[test]
    fn test_drops_oldest_sensor_keeps_stop(){
        let inbox = Inbox::new(4);
        inbox.push(Event::Stop);
        for i in 0..10{
            inbox.push(Event::Sensor(i));
        }

        assert_eq!(inbox.dropped(), 7);
        assert_eq!(inbox.drain(), vec![
            Event::Stop,
            Event::Sensor(7),
            Event::Sensor(8),
            Event::Sensor(9),
        ]);
    }

    #[test]
    fn test_recv_timeout_empty(){
        let inbox: Inbox<Event> = Inbox::new(4);
        assert_eq!(inbox.recv_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_multi_producer_order_per_producer(){
        let inbox = Arc::new(Inbox::new(2048));
        let mut handles = Vec::new();
        for p in 0..4u32{
            let inbox = Arc::clone(&inbox);
            handles.push(thread::spawn(move ||{
                for i in 0..100u32{
                    inbox.push(Event::Sensor(p * 1000 + i));
                }
            }));
        }
        for h in handles{
            h.join().unwrap();
        }

        let received = inbox.drain();
        assert_eq!(received.len(), 400);
        for p in 0..4u32{
            let mine: Vec<u32> = received.iter().filter_map(|e| match e{
                Event::Sensor(v) if v / 1000 == p => Some(*v),
                _ => None,
            }).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_consumer_wakes_on_push(){
        let inbox = Arc::new(Inbox::new(8));
        let producer = Arc::clone(&inbox);
        let handle = thread::spawn(move ||{
            thread::sleep(Duration::from_millis(20));
            producer.push(Event::Stop);
        });
        assert_eq!(inbox.recv_timeout(Duration::from_secs(2)), Some(Event::Stop));
        handle.join().unwrap();
    }
}

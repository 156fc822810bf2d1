use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use super::topic::Topic;
use super::message::Message;

//front-end handle on a topic. remembers the last epoch it consumed so polling
//on any cadence only reports real changes
pub struct Subscriber<T: Message>{
    topic: Arc<Topic<T>>,
    last_seen_epoch: AtomicU64,
}

impl<T: Message> Subscriber<T>{
    pub fn new(topic: Arc<Topic<T>>) -> Self{
        Subscriber{
            topic,
            last_seen_epoch: AtomicU64::new(0),
        }
    }

    //newest value if it changed since the last poll
    pub fn poll(&self) -> Option<T>{
        let (msg, epoch) = self.topic.peek_latest()?;
        let last = self.last_seen_epoch.swap(epoch, Ordering::SeqCst);
        if epoch > last{
            Some(msg)
        }else{
            None
        }
    }

    //block until a change arrives or the timeout expires
    pub fn wait(&self, timeout: Duration) -> Option<T>{
        let seen = self.last_seen_epoch.load(Ordering::SeqCst);
        let (msg, epoch) = self.topic.wait_newer(seen, timeout)?;
        self.last_seen_epoch.store(epoch, Ordering::SeqCst);
        Some(msg)
    }

    pub fn peek_latest(&self) -> Option<(T, u64)>{
        self.topic.peek_latest()
    }

    pub fn has_new(&self) -> bool{
        let current = self.topic.latest_epoch();
        let last = self.last_seen_epoch.load(Ordering::SeqCst);
        current > last
    }

    pub fn mark_seen(&self){
        let current = self.topic.latest_epoch();
        self.last_seen_epoch.store(current, Ordering::SeqCst);
    }

    pub fn topic_name(&self) -> &str{
        self.topic.name()
    }
}

impl<T: Message> Clone for Subscriber<T>{
    fn clone(&self) -> Self{
        Subscriber{
            topic: Arc::clone(&self.topic),
            last_seen_epoch: AtomicU64::new(self.last_seen_epoch.load(Ordering::SeqCst)),
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_subscriber_poll(){
        let topic = Arc::new(Topic::<i32>::new("/test"));
        let subscriber = Subscriber::new(Arc::clone(&topic));
        assert_eq!(subscriber.poll(), None);

        topic.publish(10);
        topic.publish(20);

        //only the newest value, once
        assert_eq!(subscriber.poll(), Some(20));
        assert_eq!(subscriber.poll(), None);
    }

    #[test]
    fn test_subscriber_has_new(){
        let topic = Arc::new(Topic::<i32>::new("/test"));
        let subscriber = Subscriber::new(Arc::clone(&topic));

        assert!(!subscriber.has_new());

        topic.publish(10);
        assert!(subscriber.has_new());

        subscriber.mark_seen();
        assert!(!subscriber.has_new());

        topic.publish(20);
        assert!(subscriber.has_new());
    }

    #[test]
    fn test_independent_subscribers(){
        let topic = Arc::new(Topic::<i32>::new("/test"));
        let a = Subscriber::new(Arc::clone(&topic));
        let b = Subscriber::new(Arc::clone(&topic));

        topic.publish(5);
        assert_eq!(a.poll(), Some(5));
        assert_eq!(b.poll(), Some(5));
        assert_eq!(a.poll(), None);
    }
}

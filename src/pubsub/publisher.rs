use std::sync::Arc;
use super::topic::Topic;
use super::subscriber::Subscriber;
use super::message::Message;

//write side of a topic, held by the single owner of the published state
pub struct Publisher<T: Message>{
    topic: Arc<Topic<T>>,
}

impl<T: Message> Publisher<T>{
    pub fn new(name: &str) -> Self{
        Publisher{ topic: Arc::new(Topic::new(name)) }
    }

    pub fn publish(&self, msg: T) -> u64{
        self.topic.publish(msg)
    }

    pub fn subscribe(&self) -> Subscriber<T>{
        Subscriber::new(Arc::clone(&self.topic))
    }

    pub fn topic(&self) -> Arc<Topic<T>>{
        Arc::clone(&self.topic)
    }

    pub fn topic_name(&self) -> &str{
        self.topic.name()
    }
}

impl<T: Message> Clone for Publisher<T>{
    fn clone(&self) -> Self{
        Publisher{ topic: Arc::clone(&self.topic) }
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_publisher_publish(){
        let publisher = Publisher::<i32>::new("/test");
        let subscriber = publisher.subscribe();
        let e1 = publisher.publish(10);
        let e2 = publisher.publish(20);
        assert_eq!(e1, 1);
        assert_eq!(e2, 2);
        assert_eq!(publisher.topic_name(), "/test");
        assert_eq!(subscriber.poll(), Some(20));
    }
}

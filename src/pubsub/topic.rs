use parking_lot::{Condvar, Mutex};
use super::message::Message;

//latest-value cell with a write epoch. readers never block writers for longer
//than a clone, and a reader that falls behind only ever sees the newest value
pub struct Topic<T: Message>{
    name: String,
    latest: Mutex<Option<(T, u64)>>,
    changed: Condvar,
}

impl<T: Message> Topic<T>{
    pub fn new(name: &str) -> Self{
        Topic{
            name: name.to_string(),
            latest: Mutex::new(None),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str{
        &self.name
    }

    //replace the value, returns its epoch
    pub fn publish(&self, msg: T) -> u64{
        let mut latest = self.latest.lock();
        let epoch = latest.as_ref().map(|(_, e)| e + 1).unwrap_or(1);
        *latest = Some((msg, epoch));
        self.changed.notify_all();
        epoch
    }

    pub fn peek_latest(&self) -> Option<(T, u64)>{
        self.latest.lock().clone()
    }

    pub fn latest_epoch(&self) -> u64{
        self.latest.lock().as_ref().map(|(_, e)| *e).unwrap_or(0)
    }

    //wait until the epoch moves past `seen` or the timeout expires
    pub fn wait_newer(&self, seen: u64, timeout: std::time::Duration) -> Option<(T, u64)>{
        let mut latest = self.latest.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop{
            if let Some((msg, epoch)) = latest.as_ref(){
                if *epoch > seen{
                    return Some((msg.clone(), *epoch));
                }
            }
            if self.changed.wait_until(&mut latest, deadline).timed_out(){
                return None;
            }
        }
    }
}

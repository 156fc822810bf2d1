use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::link::LinkChannel;
use crate::protocol::ActuatorCommand;
use crate::ring_buffer::{PushOutcome, RingBuffer, Supersede};

//a newer motor/servo/config command makes an older one pointless, an e-stop never is
impl Supersede for ActuatorCommand{
    fn is_supersedable(&self) -> bool{
        !self.is_critical()
    }
}

//what happened to a submitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome{
    //written to the serial link
    Sent,
    //held until the link comes back
    Queued,
}

//outbound commands waiting for the serial link. every write to the serial
//channel goes through flush() under the queue lock, so commands reach the
//vehicle in submission order
pub struct CommandQueue{
    buffer: Mutex<RingBuffer<ActuatorCommand>>,
    dropped: AtomicU64,
}

impl CommandQueue{
    pub fn new(capacity: usize) -> Self{
        CommandQueue{
            buffer: Mutex::new(RingBuffer::new(capacity.max(1))),
            dropped: AtomicU64::new(0),
        }
    }

    //queue a command and try to flush right away
    pub fn submit(&self, command: ActuatorCommand, channel: &LinkChannel) -> SendOutcome{
        let mut buffer = self.buffer.lock();

        let duplicate_estop = command.is_critical() && buffer.any(|c| c == &command);
        if !duplicate_estop{
            self.record(buffer.push(command));
        }

        self.flush_locked(&mut buffer, channel);
        if buffer.is_empty(){
            SendOutcome::Sent
        }else{
            SendOutcome::Queued
        }
    }

    //write everything queued, oldest first. stops at the first failure and
    //leaves the failed command at the front
    pub fn flush(&self, channel: &LinkChannel) -> usize{
        let mut buffer = self.buffer.lock();
        self.flush_locked(&mut buffer, channel)
    }

    fn flush_locked(&self, buffer: &mut RingBuffer<ActuatorCommand>, channel: &LinkChannel) -> usize{
        let mut written = 0;
        if !channel.is_connected(){
            return written;
        }

        while let Some(command) = buffer.pop(){
            let line = match command.encode(){
                Ok(line) => line,
                Err(e) =>{
                    warn!("dropping unencodable command: {}", e);
                    continue;
                }
            };

            match channel.write(line.as_bytes()){
                Ok(_) =>{
                    debug!("sent {}", line.trim_end());
                    written += 1;
                }
                Err(e) =>{
                    warn!("serial write failed: {}", e);
                    if e.is_fault(){
                        channel.mark_faulted();
                    }
                    if buffer.requeue_front(command).is_err(){
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    break;
                }
            }
        }
        written
    }

    fn record(&self, outcome: PushOutcome<ActuatorCommand>){
        match outcome{
            PushOutcome::Stored(_) => {}
            PushOutcome::Evicted{ dropped, .. } =>{
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("command queue full, dropped {:?}", dropped);
            }
            PushOutcome::Rejected(command) =>{
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("command queue full of e-stops, dropped {:?}", command);
            }
        }
    }

    //snapshot of what is waiting, oldest first
    pub fn pending(&self) -> Vec<ActuatorCommand>{
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize{
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool{
        self.buffer.lock().is_empty()
    }

    //commands evicted or lost since creation
    pub fn dropped(&self) -> u64{
        self.dropped.load(Ordering::Relaxed)
    }
}

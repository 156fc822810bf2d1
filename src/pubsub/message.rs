//anything that can be published on a topic or queued in an inbox
pub trait Message: Clone + Send + Sync + 'static{}

//blanket impl for all types that meet constraints
impl<T: Clone + Send + Sync + 'static> Message for T{}

#[cfg(test)]
mod tests{
    use super::*;

    #[derive(Clone, Default)]
    struct TestMsg{
        depth: f32,
    }

    #[test]
    fn test_message_trait_imp(){
        fn accepts_message<T: Message>(_: T){}

        accepts_message(0i32);
        accepts_message(true);
        accepts_message(TestMsg{ depth: 1.0 });
        accepts_message(std::sync::Arc::new(vec![0u8; 4]));
    }
}

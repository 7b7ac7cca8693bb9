//! Shared provider protocol: the chat request shape, the capability traits
//! provider adapters implement, and the classified error taxonomy the
//! orchestration core reports from.

pub mod backend;
pub mod error;
pub mod request;

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::backend::{FragmentStream, FragmentSubscription, ProviderKind};
    use crate::error::ProviderResult;
    use crate::request::{ChatMessage, MessageRole};

    struct EmptyFragmentSubscription;

    #[async_trait]
    impl FragmentSubscription for EmptyFragmentSubscription {
        async fn next_fragment(&mut self) -> ProviderResult<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn provider_kind_serialization_matches_config_prefixes() {
        let serialized = serde_json::to_string(&ProviderKind::OpenRouter).expect("serialize kind");
        let parsed: ProviderKind =
            serde_json::from_str("\"openrouter\"").expect("deserialize kind");

        assert_eq!(serialized, "\"openrouter\"");
        assert_eq!(parsed, ProviderKind::OpenRouter);
    }

    #[test]
    fn chat_messages_serialize_with_lowercase_roles() {
        let message = ChatMessage::system("translate this");
        let serialized = serde_json::to_string(&message).expect("serialize message");

        assert_eq!(serialized, "{\"role\":\"system\",\"content\":\"translate this\"}");
        assert_eq!(ChatMessage::user("hi").role, MessageRole::User);
    }

    #[test]
    fn fragment_stream_alias_accepts_trait_objects() {
        let _stream: FragmentStream = Box::new(EmptyFragmentSubscription);
    }
}

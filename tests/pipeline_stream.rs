//! End-to-end invocation flows over the event stream: the cache-miss chain,
//! the repeat-question hit, rephrasing with history, and stream termination.

mod common;

use common::{CountingChatModel, assert_terminated, seeded_index, streamed_text, test_rig};

use std::sync::Arc;

use async_trait::async_trait;
use ragline::events::ChatEvent;
use ragline::index::{DocumentIndex, IndexError, RetrievedChunk};
use ragline::pipeline::Pipeline;

const FAQ: &[&str] = &[
    "Refunds are processed within 5 business days of receiving the returned item.",
    "We ship to Canada, the US, and the EU.",
    "Support is available Monday through Friday, 9am to 5pm.",
];

#[tokio::test]
async fn cold_question_runs_full_chain_and_caches() {
    let rig = test_rig(seeded_index("tenant-a", FAQ), "Refunds take five business days.");

    let events = rig
        .pipeline
        .stream("What is your refund policy?", "tenant-a", "thread-1")
        .collect()
        .await;

    assert_terminated(&events);
    assert!(matches!(events[0], ChatEvent::Status(_)));
    assert_eq!(streamed_text(&events), "Refunds take five business days.");
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Error(_))));

    // full chain ran exactly once and the answer was cached
    assert_eq!(rig.generator.streams(), 1);
    assert_eq!(rig.cache.len(), 1);
    // single-turn thread: the rephrase model is skipped
    assert_eq!(rig.rephraser.completions(), 0);
}

#[tokio::test]
async fn repeat_question_short_circuits_to_cached_answer() {
    let rig = test_rig(seeded_index("tenant-a", FAQ), "Refunds take five business days.");

    let first = rig
        .pipeline
        .stream("What is your refund policy?", "tenant-a", "thread-1")
        .collect()
        .await;
    // distinct thread so the repeat is not a follow-up turn
    let second = rig
        .pipeline
        .stream("What is your refund policy?", "tenant-a", "thread-2")
        .collect()
        .await;

    assert_terminated(&second);
    // the cached answer arrives as token content, identical to the first run
    assert_eq!(streamed_text(&second), streamed_text(&first));
    // generation and rephrasing ran only for the first invocation
    assert_eq!(rig.generator.streams(), 1);
    assert_eq!(rig.rephraser.completions(), 0);
    // and the hit did not re-cache its own answer
    assert_eq!(rig.cache.len(), 1);
}

#[tokio::test]
async fn token_order_reassembles_the_answer() {
    let rig = test_rig(
        seeded_index("tenant-a", FAQ),
        "We ship to Canada, the US, and the EU.",
    );

    let events = rig
        .pipeline
        .stream("Where do you ship?", "tenant-a", "thread-1")
        .collect()
        .await;

    let tokens: Vec<&str> = events.iter().filter_map(ChatEvent::as_token).collect();
    assert!(tokens.len() > 1, "answer should stream as multiple fragments");
    assert_eq!(tokens.concat(), "We ship to Canada, the US, and the EU.");
}

#[tokio::test]
async fn follow_up_question_is_rephrased_against_history() {
    let rig = test_rig(seeded_index("tenant-a", FAQ), "About a week.");

    rig.pipeline
        .stream("Do you ship to Canada?", "tenant-a", "thread-1")
        .collect()
        .await;
    assert_eq!(rig.rephraser.completions(), 0);

    let events = rig
        .pipeline
        .stream("How long does it take?", "tenant-a", "thread-1")
        .collect()
        .await;

    assert_terminated(&events);
    // second turn has history, so the rephrase model ran exactly once
    assert_eq!(rig.rephraser.completions(), 1);
    assert_eq!(rig.generator.streams(), 2);
}

#[tokio::test]
async fn fatal_stage_failure_yields_generic_error_then_end() {
    struct FailingIndex;

    #[async_trait]
    impl DocumentIndex for FailingIndex {
        async fn search(
            &self,
            _tenant_id: &str,
            _embedding: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, IndexError> {
            Err(IndexError::Unavailable("vector store not initialized".into()))
        }
    }

    let generator = Arc::new(CountingChatModel::new("never sent"));
    let pipeline = Pipeline::builder()
        .with_embedder(common::mock_embedder())
        .with_cache(Arc::new(ragline::cache::MemorySemanticCache::new()))
        .with_document_index(Arc::new(FailingIndex))
        .with_chat_model(generator.clone())
        .build()
        .unwrap();

    let events = pipeline
        .stream("Where is my order?", "tenant-a", "thread-1")
        .collect()
        .await;

    assert_terminated(&events);
    let errors: Vec<&ChatEvent> = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::Error(_)))
        .collect();
    assert_eq!(errors.len(), 1);
    // the client sees a generic message, not backend detail
    if let ChatEvent::Error(message) = errors[0] {
        assert!(!message.contains("vector store"));
    }
    // no tokens were streamed and generation never ran
    assert!(streamed_text(&events).is_empty());
    assert_eq!(generator.streams(), 0);
}

#[tokio::test]
async fn concurrent_invocations_keep_streams_separate() {
    let rig = test_rig(seeded_index("tenant-a", FAQ), "Same answer for both.");

    let stream_a = rig
        .pipeline
        .stream("Where do you ship?", "tenant-a", "thread-a");
    let stream_b = rig
        .pipeline
        .stream("What are your support hours?", "tenant-a", "thread-b");

    let (events_a, events_b) = tokio::join!(stream_a.collect(), stream_b.collect());
    assert_terminated(&events_a);
    assert_terminated(&events_b);
    assert_eq!(streamed_text(&events_a), "Same answer for both.");
    assert_eq!(streamed_text(&events_b), "Same answer for both.");
    assert_eq!(rig.generator.streams(), 2);
}

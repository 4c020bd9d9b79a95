use super::*;
use crate::host::{Runtime, SenderInfo};
use futures::StreamExt;
use messages::Code;
use serde_json::json;
use tokio::time::timeout;

async fn channel() -> (Port, Port) {
    let runtime = Runtime::new("ext");
    let mut connects = runtime.on_connect();
    let producer = runtime.connect("app-STREAM-1", SenderInfo::extension("ext"));
    let consumer = connects.recv().await.unwrap();
    (producer, consumer)
}

async fn next(stream: &mut PortStream) -> Option<Result<Value, TransportError>> {
    timeout(Duration::from_secs(1), stream.next()).await.expect("stream stalled")
}

#[tokio::test]
async fn yields_values_then_ends_on_done() {
    let (producer, consumer) = channel().await;
    let mut stream = PortStream::new(consumer, None);

    producer.post(&json!({ "value": 1 })).unwrap();
    producer.post(&json!({ "value": { "n": 2 } })).unwrap();
    producer.post(&json!({ "done": true })).unwrap();

    assert_eq!(next(&mut stream).await, Some(Ok(json!(1))));
    assert_eq!(next(&mut stream).await, Some(Ok(json!({ "n": 2 }))));
    assert_eq!(next(&mut stream).await, None);
    assert_eq!(next(&mut stream).await, None);
    assert!(stream.is_disconnected());
}

#[tokio::test]
async fn items_sent_before_first_poll_are_kept() {
    let (producer, consumer) = channel().await;
    let stream = PortStream::new(consumer, None);

    for n in 0..5 {
        producer.post(&json!({ "value": n })).unwrap();
    }
    producer.post(&json!({ "done": true })).unwrap();

    let items: Vec<_> = stream.map(Result::unwrap).collect().await;
    assert_eq!(items, (0..5).map(|n| json!(n)).collect::<Vec<_>>());
}

#[tokio::test]
async fn abort_surfaces_the_reason() {
    let (producer, consumer) = channel().await;
    let mut stream = PortStream::new(consumer, None);

    producer.post(&json!({ "value": 1 })).unwrap();
    producer
        .post(&json!({ "abort": { "code": "failed_precondition", "message": "no more" } }))
        .unwrap();

    assert_eq!(next(&mut stream).await, Some(Ok(json!(1))));
    let err = next(&mut stream).await.unwrap().unwrap_err();
    assert_eq!(err.code, Code::FailedPrecondition);
    assert_eq!(err.message, "no more");
    assert_eq!(next(&mut stream).await, None);
    assert!(stream.is_disconnected());
}

#[tokio::test]
async fn disconnect_before_done_is_aborted() {
    let (producer, consumer) = channel().await;
    let mut stream = PortStream::new(consumer, None);

    producer.post(&json!({ "value": 1 })).unwrap();
    producer.disconnect();

    assert_eq!(next(&mut stream).await, Some(Ok(json!(1))));
    let err = next(&mut stream).await.unwrap().unwrap_err();
    assert_eq!(err, TransportError::aborted("source disconnected"));
}

#[tokio::test]
async fn unknown_item_fails_the_stream() {
    let (producer, consumer) = channel().await;
    let mut stream = PortStream::new(consumer, None);

    producer.post(&json!({ "surprise": true })).unwrap();

    let err = next(&mut stream).await.unwrap().unwrap_err();
    assert_eq!(err.code, Code::Internal);
    assert_eq!(err.details, vec![json!({ "surprise": true })]);
    assert!(stream.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn silence_times_out() {
    let (producer, consumer) = channel().await;
    let mut producer_events = producer.events().unwrap();
    let mut stream = PortStream::new(consumer, Some(Duration::from_millis(100)));

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err, TransportError::deadline_exceeded("source timeout"));
    assert_eq!(producer_events.recv().await, Some(PortEvent::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn each_value_restarts_the_idle_timer() {
    let (producer, consumer) = channel().await;
    let mut stream = PortStream::new(consumer, Some(Duration::from_millis(100)));

    let feeder = tokio::spawn(async move {
        for n in 0..4 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            producer.post(&json!({ "value": n })).unwrap();
        }
        producer.post(&json!({ "done": true })).unwrap();
    });

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        seen.push(item.unwrap());
    }
    assert_eq!(seen, (0..4).map(|n| json!(n)).collect::<Vec<_>>());
    feeder.await.unwrap();
}

#[tokio::test]
async fn dropping_unfinished_stream_disconnects() {
    let (producer, consumer) = channel().await;
    let mut producer_events = producer.events().unwrap();
    let mut stream = PortStream::new(consumer, None);

    producer.post(&json!({ "value": 1 })).unwrap();
    assert_eq!(next(&mut stream).await, Some(Ok(json!(1))));
    drop(stream);

    let event = timeout(Duration::from_secs(1), producer_events.recv()).await.unwrap();
    assert_eq!(event, Some(PortEvent::Disconnect));
    assert!(matches!(producer.post(&json!({ "value": 2 })), Err(crate::host::PortError::Disconnected)));
}

#[tokio::test]
async fn stream_over_taken_port_fails() {
    let (_producer, consumer) = channel().await;
    let _events = consumer.events();
    let mut stream = PortStream::new(consumer, None);

    let err = next(&mut stream).await.unwrap().unwrap_err();
    assert_eq!(err.code, Code::Internal);
}

//! Request/reply correlation tests
//!
//! A replier task answers directive requests over the loopback hub
//! while requesters exercise the blocking and callback paths,
//! timeout boundaries, republishing, and multi-response streams.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stellarbus::{
    Config, Connection, ConnectionEvent, Field, FieldValue, Kind, LoopbackHub, Message,
    ResponseStatus, REPUBLISH_NEVER,
};

const REQ_PATTERN: &str = "MSN1.SAT1.REQ.DIR.>";

fn connection(hub: &LoopbackHub) -> Connection {
    Connection::new(Config::new(), Arc::new(hub.endpoint())).unwrap()
}

fn directive(text: &str) -> Message {
    let mut msg = Message::new("MSN1.SAT1.REQ.DIR.COMP", Kind::Request).unwrap();
    msg.add_field(Field::new("DIRECTIVE-STRING", text).unwrap());
    msg
}

fn response(status: ResponseStatus, data: &str) -> Message {
    let mut msg = Message::new("MSN1.SAT1.RESP.DIR.COMP", Kind::Reply).unwrap();
    msg.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(status as i16)).unwrap());
    msg.add_field(Field::new("DATA", data).unwrap());
    msg
}

/// Answer every inbound directive by echoing it back in DATA
async fn spawn_echo_replier(hub: &LoopbackHub) -> Connection {
    let replier = connection(hub);
    replier.connect().await.unwrap();
    replier.subscribe(REQ_PATTERN).unwrap();

    let conn = replier.clone();
    tokio::spawn(async move {
        while let Ok(Some(request)) = conn.receive(-1).await {
            let echoed = request.get_string_value("DIRECTIVE-STRING").unwrap_or_default();
            let resp = response(ResponseStatus::SuccessfulCompletion, &echoed);
            if conn.reply(&request, &resp).await.is_err() {
                break;
            }
        }
    });
    replier
}

#[tokio::test]
async fn test_blocking_request_gets_reply() {
    let hub = LoopbackHub::new();
    let replier = spawn_echo_replier(&hub).await;
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    let reply = requester
        .request(&directive("DO-THE-THING"), 2000, REPUBLISH_NEVER)
        .await
        .unwrap()
        .expect("reply expected");

    assert_eq!(reply.kind(), Kind::Reply);
    assert_eq!(reply.get_string_field("DATA").unwrap(), "DO-THE-THING");
    assert_eq!(reply.response_status().unwrap(), ResponseStatus::SuccessfulCompletion);

    requester.disconnect().await.unwrap();
    replier.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_correlate_independently() {
    let hub = LoopbackHub::new();

    // replier that answers out of order: holds the first request
    // until the second arrives
    let replier = connection(&hub);
    replier.connect().await.unwrap();
    replier.subscribe(REQ_PATTERN).unwrap();
    {
        let conn = replier.clone();
        tokio::spawn(async move {
            let first = conn.receive(-1).await.unwrap().unwrap();
            let second = conn.receive(-1).await.unwrap().unwrap();
            for request in [second, first] {
                let echoed = request.get_string_value("DIRECTIVE-STRING").unwrap();
                let resp = response(ResponseStatus::SuccessfulCompletion, &echoed);
                conn.reply(&request, &resp).await.unwrap();
            }
        });
    }

    let requester = connection(&hub);
    requester.connect().await.unwrap();

    let r1 = {
        let requester = requester.clone();
        tokio::spawn(async move {
            requester.request(&directive("ONE"), 3000, REPUBLISH_NEVER).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let r2 = {
        let requester = requester.clone();
        tokio::spawn(async move {
            requester.request(&directive("TWO"), 3000, REPUBLISH_NEVER).await
        })
    };

    // replies arrive out of order, yet each caller gets its own
    let reply1 = r1.await.unwrap().unwrap().expect("reply for ONE");
    let reply2 = r2.await.unwrap().unwrap().expect("reply for TWO");
    assert_eq!(reply1.get_string_field("DATA").unwrap(), "ONE");
    assert_eq!(reply2.get_string_field("DATA").unwrap(), "TWO");

    requester.disconnect().await.unwrap();
    replier.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_timeout_boundary_no_republish() {
    let hub = LoopbackHub::new();
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    // count how many times the request actually hits the bus
    let observer = connection(&hub);
    observer.connect().await.unwrap();
    observer.subscribe(REQ_PATTERN).unwrap();

    let timeouts = Arc::new(Mutex::new(0usize));
    {
        let timeouts = timeouts.clone();
        requester.register_event_callback(
            ConnectionEvent::RequestTimeout,
            Arc::new(move |_event, _status| {
                *timeouts.lock() += 1;
            }),
        );
    }

    let started = Instant::now();
    let reply = requester
        .request(&directive("NOBODY-HOME"), 100, REPUBLISH_NEVER)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(100), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1000), "returned late: {:?}", elapsed);
    assert_eq!(*timeouts.lock(), 1);

    // exactly one publish: republishing was disabled
    assert!(observer.receive(200).await.unwrap().is_some());
    assert!(observer.receive(200).await.unwrap().is_none());

    requester.disconnect().await.unwrap();
    observer.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_republish_resends_until_answered() {
    let hub = LoopbackHub::new();
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    let observer = connection(&hub);
    observer.connect().await.unwrap();
    observer.subscribe(REQ_PATTERN).unwrap();

    // interval below the floor is clamped to 100ms
    let reply = requester.request(&directive("ANYONE"), 600, 10).await.unwrap();
    assert!(reply.is_none());

    let mut sends = 0;
    while observer.receive(100).await.unwrap().is_some() {
        sends += 1;
    }
    assert!(sends >= 3, "expected several republishes, saw {}", sends);
    // the pending entry is gone after the timeout, so republishing stops
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(observer.receive(100).await.unwrap().is_none());

    requester.disconnect().await.unwrap();
    observer.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_request_with_callback_delivers_reply() {
    let hub = LoopbackHub::new();
    let replier = spawn_echo_replier(&hub).await;
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let replies = replies.clone();
        requester
            .request_with_callback(
                &directive("ASYNC"),
                2000,
                REPUBLISH_NEVER,
                Arc::new(move |request: &Message, reply: &Message| {
                    let dir = request.get_string_value("DIRECTIVE-STRING").unwrap();
                    let data = reply.get_string_value("DATA").unwrap();
                    replies.lock().push(format!("{}={}", dir, data));
                }),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*replies.lock(), vec!["ASYNC=ASYNC".to_string()]);

    requester.disconnect().await.unwrap();
    replier.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_async_timeout_fires_event_and_abandons_request() {
    let hub = LoopbackHub::new();
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    let timeouts = Arc::new(Mutex::new(0usize));
    {
        let timeouts = timeouts.clone();
        requester.register_event_callback(
            ConnectionEvent::RequestTimeout,
            Arc::new(move |_event, _status| {
                *timeouts.lock() += 1;
            }),
        );
    }

    requester
        .request_with_callback(
            &directive("VOID"),
            100,
            REPUBLISH_NEVER,
            Arc::new(|_request: &Message, _reply: &Message| {}),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*timeouts.lock(), 1);

    requester.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_multi_response_stream_until_terminal_status() {
    let hub = LoopbackHub::new();

    // replier that acknowledges, reports progress, then completes
    let replier = connection(&hub);
    replier.connect().await.unwrap();
    replier.subscribe(REQ_PATTERN).unwrap();
    {
        let conn = replier.clone();
        tokio::spawn(async move {
            let request = conn.receive(-1).await.unwrap().unwrap();
            for (status, data) in [
                (ResponseStatus::Acknowledgement, "ack"),
                (ResponseStatus::WorkingKeepAlive, "working"),
                (ResponseStatus::SuccessfulCompletion, "done"),
            ] {
                conn.reply(&request, &response(status, data)).await.unwrap();
            }
        });
    }

    let requester = Connection::new(
        Config::from_args(&["mw-multi-resp=true"]),
        Arc::new(hub.endpoint()),
    )
    .unwrap();
    requester.connect().await.unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        requester
            .request_with_callback(
                &directive("LONG-TASK"),
                5000,
                REPUBLISH_NEVER,
                Arc::new(move |_request: &Message, reply: &Message| {
                    seen.lock().push(reply.get_string_value("DATA").unwrap());
                }),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        *seen.lock(),
        vec!["ack".to_string(), "working".to_string(), "done".to_string()]
    );

    requester.disconnect().await.unwrap();
    replier.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unrelated_reply_is_ignored() {
    use stellarbus::{Transport, WireMessage};

    let hub = LoopbackHub::new();
    let requester = connection(&hub);
    requester.connect().await.unwrap();

    // a rogue peer broadcasts a reply nobody asked for, straight
    // over the transport with a bogus correlation ID
    let rogue = hub.endpoint();
    rogue.connect().await.unwrap();

    let pending = {
        let requester = requester.clone();
        tokio::spawn(async move {
            requester.request(&directive("REAL"), 500, REPUBLISH_NEVER).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut bogus = response(ResponseStatus::SuccessfulCompletion, "bogus");
    bogus.add_field(Field::new("__STB-REPLY-UNIQUE-ID__", "not-a-real-id").unwrap());
    rogue
        .send(WireMessage {
            subject: bogus.subject().to_string(),
            payload: bogus.to_json(),
        })
        .await
        .unwrap();

    // the real request still times out rather than accepting the
    // unrelated reply
    let result = pending.await.unwrap().unwrap();
    assert!(result.is_none());

    requester.disconnect().await.unwrap();
}

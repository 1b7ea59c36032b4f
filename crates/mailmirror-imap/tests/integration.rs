//! Integration tests for the IMAP client.
//!
//! A small scripted server on a loopback socket answers each command by name,
//! so the full session path (connect, login, select, batched fetch, reconnect)
//! runs without a real IMAP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use mailmirror_imap::{
    Budget, Config, Credentials, Error, FetchFields, Mailbox, ResponseParser, SearchCriteria,
    Security, Session, SessionConfig, Uid,
};

const MESSAGES: u32 = 2500;

#[derive(Default)]
struct Script {
    fetches: AtomicUsize,
    connections: AtomicUsize,
    /// Drop the connection on this (1-based) UID FETCH of the first connection.
    fail_fetch: Option<usize>,
}

async fn start(script: Script) -> (u16, Arc<Script>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let script = Arc::new(script);
    let shared = Arc::clone(&script);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let script = Arc::clone(&shared);
            tokio::spawn(serve(socket, script));
        }
    });
    (port, script)
}

async fn serve(socket: TcpStream, script: Arc<Script>) {
    let connection = script.connections.fetch_add(1, Ordering::SeqCst);
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let caps = "IMAP4rev1 IDLE UIDPLUS";
    write
        .write_all(format!("* OK [CAPABILITY {caps}] test server ready\r\n").as_bytes())
        .await
        .unwrap();
    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split(' ').collect();
        let tag = words[0];
        let name = words.get(1).copied().unwrap_or("").to_ascii_uppercase();
        let sub = words.get(2).copied().unwrap_or("").to_ascii_uppercase();
        let reply = match (name.as_str(), sub.as_str()) {
            ("LOGIN", _) => format!("{tag} OK [CAPABILITY {caps}] logged in\r\n"),
            ("CAPABILITY", _) => format!("* CAPABILITY {caps}\r\n{tag} OK done\r\n"),
            ("SELECT" | "EXAMINE", _) => format!(
                "* {MESSAGES} EXISTS\r\n* OK [UIDVALIDITY 7] ok\r\n* OK [UIDNEXT {}] ok\r\n{tag} OK [READ-ONLY] done\r\n",
                MESSAGES + 1
            ),
            ("UID", "SEARCH") => {
                let uids: Vec<String> = (1..=MESSAGES).map(|u| u.to_string()).collect();
                format!("* SEARCH {}\r\n{tag} OK done\r\n", uids.join(" "))
            }
            ("UID", "FETCH") => {
                let n = script.fetches.fetch_add(1, Ordering::SeqCst) + 1;
                if connection == 0 && script.fail_fetch == Some(n) {
                    return;
                }
                let mut out = String::new();
                for uid in expand(words[3]) {
                    out.push_str(&format!("* {uid} FETCH (UID {uid} FLAGS (\\Seen))\r\n"));
                }
                out.push_str(&format!("{tag} OK done\r\n"));
                out
            }
            ("LOGOUT", _) => {
                let _ = write
                    .write_all(format!("* BYE bye\r\n{tag} OK done\r\n").as_bytes())
                    .await;
                return;
            }
            _ => format!("{tag} BAD unknown\r\n"),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn expand(set: &str) -> Vec<u32> {
    let mut out = Vec::new();
    for part in set.split(',') {
        match part.split_once(':') {
            Some((a, b)) => out.extend(a.parse::<u32>().unwrap()..=b.parse::<u32>().unwrap()),
            None => out.push(part.parse().unwrap()),
        }
    }
    out
}

fn config(port: u16) -> SessionConfig {
    let server = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::Plain)
        .io_timeout(Duration::from_secs(5))
        .build();
    SessionConfig::new(
        server,
        Credentials::Password {
            username: "mirror".into(),
            password: "secret".into(),
        },
    )
    .reconnect_backoff(Duration::from_millis(10))
}

#[tokio::test]
async fn batched_fetch_takes_three_round_trips() {
    let (port, script) = start(Script::default()).await;
    let mut session = Session::connect(config(port)).await.unwrap();
    assert!(!session.is_gmail());

    let status = session.select(&Mailbox::new("INBOX"), true).await.unwrap();
    assert_eq!(status.exists, MESSAGES);
    assert_eq!(status.uid_next_or_default(), MESSAGES + 1);
    assert_eq!(status.uid_validity.unwrap().get(), 7);

    let uids = session.search(&SearchCriteria::All).await.unwrap();
    assert_eq!(uids.len(), MESSAGES as usize);

    let mut batches = session.fetch_batch(&uids, FetchFields::new().flags(), &Budget::count(1000));
    assert_eq!(batches.remaining(), 3);
    let mut sizes = Vec::new();
    let mut seen = Vec::new();
    while let Some(rows) = batches.next().await {
        let rows = rows.unwrap();
        sizes.push(rows.len());
        seen.extend(rows.iter().map(|r| r.uid.get()));
        assert!(rows.iter().all(|r| r.flags.is_seen()));
    }
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert_eq!(seen, (1..=MESSAGES).collect::<Vec<_>>());
    assert_eq!(script.fetches.load(Ordering::SeqCst), 3);

    session.logout().await;
}

#[tokio::test]
async fn failed_round_trip_is_repeated_after_reconnect() {
    let (port, script) = start(Script {
        fail_fetch: Some(2),
        ..Script::default()
    })
    .await;
    let mut session = Session::connect(config(port)).await.unwrap();
    session.select(&Mailbox::new("INBOX"), true).await.unwrap();
    let uids: Vec<Uid> = (1..=MESSAGES).filter_map(Uid::new).collect();

    let mut batches = session.fetch_batch(&uids, FetchFields::new().flags(), &Budget::count(1000));
    let first = batches.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1000);

    let err = batches.next().await.unwrap().unwrap_err();
    assert!(err.is_retryable(), "unexpected error {err}");
    assert_eq!(batches.remaining(), 2);

    batches.reconnect().await.unwrap();
    let second = batches.next().await.unwrap().unwrap();
    assert_eq!(second.first().unwrap().uid.get(), 1001);
    assert_eq!(second.len(), 1000);
    let third = batches.next().await.unwrap().unwrap();
    assert_eq!(third.len(), 500);
    assert!(batches.next().await.is_none());

    assert_eq!(script.connections.load(Ordering::SeqCst), 2);
    assert_eq!(session.selected(), Some(&Mailbox::new("INBOX")));
}

#[tokio::test]
async fn skipped_round_trip_is_dropped() {
    let (port, _script) = start(Script::default()).await;
    let mut session = Session::connect(config(port)).await.unwrap();
    session.select(&Mailbox::new("INBOX"), true).await.unwrap();
    let uids: Vec<Uid> = (1..=30).filter_map(Uid::new).collect();

    let mut batches = session.fetch_batch(&uids, FetchFields::new(), &Budget::count(10));
    let skipped = batches.skip().unwrap();
    assert_eq!(skipped.first().unwrap().get(), 1);
    let mut total = 0;
    while let Some(rows) = batches.next().await {
        total += rows.unwrap().len();
    }
    assert_eq!(total, 20);
}

#[tokio::test]
async fn empty_uid_list_makes_no_round_trip() {
    let (port, script) = start(Script::default()).await;
    let mut session = Session::connect(config(port)).await.unwrap();
    session.select(&Mailbox::new("INBOX"), true).await.unwrap();
    let rows = session.fetch(&[], &FetchFields::headers()).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(script.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn commands_need_a_selected_mailbox() {
    let (port, _script) = start(Script::default()).await;
    let mut session = Session::connect(config(port)).await.unwrap();
    let err = session.search(&SearchCriteria::All).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let err = Session::connect(config(port)).await.unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn parser_reads_gmail_fetch() {
    let line = b"* 1 FETCH (UID 42 X-GM-MSGID 1278455344230334865 X-GM-LABELS (\\Inbox \"Work\"))\r\n";
    let row = mailmirror_imap::fetch::parse_fetch_line(line).unwrap();
    assert_eq!(row.uid.get(), 42);
    assert_eq!(row.gm_msgid, Some(1278455344230334865));
    assert_eq!(row.labels, vec!["\\Inbox".to_string(), "Work".to_string()]);
    assert!(ResponseParser::parse(b"* 23 EXISTS\r\n").is_ok());
}

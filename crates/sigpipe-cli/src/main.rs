use std::sync::Arc;

use anyhow::Context;
use rand::seq::SliceRandom;
use serde::Deserialize;
use sigpipe_core::{
    Envelope, FailurePolicy, JsonDecode, MessageId, Part, Pipe, PipeConfig, PipeWriter,
    Reassembler, StreamId,
};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CHUNK: usize = 8;

#[derive(Debug, Deserialize)]
struct Signal {
    kind: String,
    body: String,
}

/// 1 メッセージを CHUNK バイトずつの part に分割する
fn split(stream: &StreamId, message: &str) -> anyhow::Result<Vec<Envelope<Vec<u8>>>> {
    let id = MessageId::generate();
    let chunks: Vec<&[u8]> = message.as_bytes().chunks(CHUNK).collect();
    let total = u32::try_from(chunks.len())?;

    chunks
        .into_iter()
        .zip(0..)
        .map(|(chunk, index)| -> anyhow::Result<Envelope<Vec<u8>>> {
            let part = Part::new(id, index, total)?;
            Ok(Envelope::new(stream.clone(), chunk.to_vec()).with_part(part))
        })
        .collect()
}

/// producer：part を順番に書き込むだけ
async fn produce(writer: PipeWriter<Vec<u8>, Vec<Vec<u8>>>, parts: Vec<Envelope<Vec<u8>>>) {
    for part in parts {
        if let Err(rejected) = writer.write(part) {
            warn!("{rejected}");
            return;
        }
        tokio::task::yield_now().await;
    }
}

fn load_config() -> anyhow::Result<PipeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            PipeConfig::from_json(&json).with_context(|| format!("parsing {path}"))
        }
        None => Ok(PipeConfig::named("reassemble")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 2 段の pipe を用意：part の組み立て → JSON decode
    let reassemble = Arc::new(Pipe::spawn_with_config(Reassembler::new(), load_config()?));
    let decode = Arc::new(Pipe::spawn_with_config(
        JsonDecode::<Signal>::new(),
        PipeConfig::named("decode").with_failure_policy(FailurePolicy::Skip),
    ));

    // (B) メッセージを part に分割してシャッフル（到着順はバラバラになる）
    let stream = StreamId::new("demo-session");
    let messages = [
        r#"{"kind":"chat","body":"hello from the first peer"}"#,
        r#"{"kind":"mute","body":"audio off"}"#,
        r#"{"kind":"chat","body":"#,
        r#"{"kind":"cursor","body":"x=120,y=48"}"#,
    ];
    let mut parts = Vec::new();
    for message in messages {
        parts.extend(split(&stream, message)?);
    }
    parts.shuffle(&mut rand::thread_rng());

    // (C) 2 本の producer で書き込む
    let (left, right): (Vec<_>, Vec<_>) = parts.into_iter().enumerate().partition(|(i, _)| i % 2 == 0);
    let producers = [left, right].map(|half| {
        let parts = half.into_iter().map(|(_, p)| p).collect();
        tokio::spawn(produce(reassemble.writer(), parts))
    });

    // (D) 1 段目の出力を連結して 2 段目に流す
    let forwarder = tokio::spawn({
        let reassemble = Arc::clone(&reassemble);
        let decode = Arc::clone(&decode);
        async move {
            while let Some(message) = reassemble.read().await {
                if decode.write(message.map(|parts| parts.concat())).is_err() {
                    break;
                }
            }
        }
    });

    for producer in producers {
        producer.await?;
    }

    // (E) 全メッセージが 2 段目を通過するまで待ってから閉じる
    loop {
        let stats = decode.stats();
        if stats.processed + stats.failed >= messages.len() as u64 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }

    let reassembled = reassemble.shutdown().await?;
    forwarder.await?;
    decode.close();
    while let Some(signal) = decode.read().await {
        let signal = signal.payload();
        println!("{:>8}: {}", signal.kind, signal.body);
    }
    let decoded = decode.shutdown().await?;

    info!(stats = %serde_json::to_string(&reassembled)?, "reassemble finished");
    info!(stats = %serde_json::to_string(&decoded)?, "decode finished");
    Ok(())
}

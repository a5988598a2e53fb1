//! Spoken answers through the Google Translate TTS endpoint.
//!
//! Synthesis and playback both block, so they run on a dedicated
//! [`SpeechWorker`] thread. Utterances queue up and play one at a time.

use base64::Engine as _;
use regex::Regex;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::MygeminiError;

/// Longest text the endpoint accepts per request.
pub const MAX_CHUNK_CHARS: usize = 100;

const RPC_ID: &str = "jQ1olc";
const TEMP_PREFIX: &str = "temp_speech_";
const TEMP_SUFFIX: &str = ".mp3";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn piece_regex() -> &'static Regex {
    static PIECE: OnceLock<Regex> = OnceLock::new();
    PIECE.get_or_init(|| {
        // A run of text plus its trailing punctuation, or bare punctuation.
        Regex::new(r"[^.!?,;:。！？…\n]+[.!?,;:。！？…\n]*|[.!?,;:。！？…\n]+")
            .expect("static regex")
    })
}

fn audio_regex() -> &'static Regex {
    static AUDIO: OnceLock<Regex> = OnceLock::new();
    AUDIO.get_or_init(|| Regex::new(r#"jQ1olc","\[\\"(.*)\\"]"#).expect("static regex"))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `max_chars` characters, preferring
/// punctuation boundaries, then whitespace, then a hard cut.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut units: Vec<String> = Vec::new();

    for piece in piece_regex().find_iter(text).map(|m| m.as_str()) {
        if char_len(piece) <= max_chars {
            units.push(piece.to_string());
            continue;
        }
        for word in piece.split_inclusive(char::is_whitespace) {
            if char_len(word) <= max_chars {
                units.push(word.to_string());
            } else {
                let chars: Vec<char> = word.chars().collect();
                units.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if char_len(&current) + char_len(&unit) > max_chars {
            push_trimmed(&mut chunks, &current);
            current.clear();
        }
        current.push_str(&unit);
    }
    push_trimmed(&mut chunks, &current);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// `f.req` form value for one chunk.
fn rpc_payload(text: &str, lang: &str, slow: bool) -> String {
    let speed = if slow {
        serde_json::Value::Bool(true)
    } else {
        serde_json::Value::Null
    };
    let parameter = serde_json::json!([text, lang, speed, "null"]).to_string();
    serde_json::json!([[[RPC_ID, parameter, null, "generic"]]]).to_string()
}

/// Pull the base64 MP3 out of a batchexecute response body.
fn extract_audio(body: &str) -> Result<Vec<u8>, MygeminiError> {
    for line in body.lines().filter(|l| l.contains(RPC_ID)) {
        if let Some(caps) = audio_regex().captures(line) {
            return base64::engine::general_purpose::STANDARD
                .decode(&caps[1])
                .map_err(|e| MygeminiError::Speech(format!("invalid audio payload: {}", e)));
        }
    }
    Err(MygeminiError::Speech("no audio in TTS response".to_string()))
}

pub fn temp_file_name() -> String {
    format!("{}{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple(), TEMP_SUFFIX)
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Remove speech files left behind by an earlier run. Returns how many went.
pub fn sweep_stale_files(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No speech temp dir to sweep at {:?}: {}", dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_temp_file(&name.to_string_lossy()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove temp file {:?}: {}", entry.path(), e),
        }
    }
    if removed > 0 {
        info!("Removed {} stale speech files from {:?}", removed, dir);
    }
    removed
}

pub struct SpeechService {
    client: reqwest::blocking::Client,
    url: String,
    lang: String,
    slow: bool,
    temp_dir: PathBuf,
}

impl SpeechService {
    pub fn new(config: &SpeechConfig) -> Result<Self, MygeminiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MygeminiError::Speech(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "https://translate.google.{}/_/TranslateWebserverUi/data/batchexecute",
                config.tld
            ),
            lang: config.lang.clone(),
            slow: config.slow,
            temp_dir: PathBuf::from(&config.temp_dir),
        })
    }

    /// MP3 bytes for `text`, one request per chunk.
    pub fn synthesize(&self, text: &str) -> Result<Vec<u8>, MygeminiError> {
        let mut audio = Vec::new();
        for chunk in chunk_text(text, MAX_CHUNK_CHARS) {
            let response = self
                .client
                .post(&self.url)
                .header(reqwest::header::REFERER, "http://translate.google.com/")
                .form(&[("f.req", rpc_payload(&chunk, &self.lang, self.slow))])
                .send()
                .map_err(|e| MygeminiError::Speech(format!("request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(MygeminiError::Speech(format!(
                    "TTS endpoint returned status {}",
                    response.status()
                )));
            }

            let body = response
                .text()
                .map_err(|e| MygeminiError::Speech(format!("failed to read response: {}", e)))?;
            audio.extend(extract_audio(&body)?);
        }
        Ok(audio)
    }

    pub fn speak(&self, text: &str) -> Result<(), MygeminiError> {
        let audio = self.synthesize(text)?;
        if audio.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.temp_dir)?;
        let path = self.temp_dir.join(temp_file_name());
        std::fs::write(&path, &audio)?;

        let result = play_file(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove {:?}: {}", path, e);
        }
        result
    }
}

fn play_file(path: &Path) -> Result<(), MygeminiError> {
    let stream = rodio::OutputStreamBuilder::open_default_stream()
        .map_err(|e| MygeminiError::Speech(format!("failed to open audio output: {}", e)))?;

    let file = File::open(path)?;
    let source = rodio::Decoder::new(BufReader::new(file))
        .map_err(|e| MygeminiError::Speech(format!("failed to decode audio: {}", e)))?;

    let sink = rodio::Sink::connect_new(stream.mixer());
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

/// Background thread that speaks queued texts in order.
pub struct SpeechWorker {
    tx: Option<mpsc::Sender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl SpeechWorker {
    pub fn spawn(config: SpeechConfig) -> Result<Self, MygeminiError> {
        let (tx, rx) = mpsc::channel::<String>();

        let handle = std::thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                // The blocking client has to be built off the async runtime.
                let service = match SpeechService::new(&config) {
                    Ok(service) => service,
                    Err(e) => {
                        warn!("Speech disabled: {}", e);
                        return;
                    }
                };
                for text in rx {
                    info!("Speaking {} chars", text.chars().count());
                    match service.speak(&text) {
                        Ok(()) => debug!("Playback finished"),
                        Err(e) => warn!("Speech output failed: {}", e),
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn say(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(ref tx) = self.tx {
            if tx.send(text.to_string()).is_err() {
                warn!("Speech worker has stopped, dropping utterance");
            }
        }
    }

    /// Close the queue and wait for queued speech to finish.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Speech worker panicked");
            }
        }
    }
}

impl Drop for SpeechWorker {
    fn drop(&mut self) {
        // Detach rather than join; `shutdown` is the blocking path.
        self.tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_short_text() {
        let chunks = chunk_text("Hello world. This is a test.", MAX_CHUNK_CHARS);
        assert_eq!(chunks, vec!["Hello world. This is a test."]);
    }

    #[test]
    fn test_chunk_prefers_punctuation() {
        let chunks = chunk_text("Hello world. This is a test.", 15);
        assert_eq!(chunks, vec!["Hello world.", "This is a test."]);
    }

    #[test]
    fn test_chunk_hard_cut() {
        let text = "a".repeat(250);
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn test_chunk_respects_limit_and_keeps_text() {
        let text = "러스트는 안전한 시스템 프로그래밍 언어입니다. 메모리 안전성을 보장하면서도 빠릅니다! \
                    소유권과 빌림 규칙이 핵심입니다, 그리고 컴파일러가 이를 검사합니다."
            .repeat(3);
        let chunks = chunk_text(&text, 40);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));

        let joined: String = chunks.concat().chars().filter(|c| !c.is_whitespace()).collect();
        let original: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(joined, original);
    }

    #[test]
    fn test_chunk_empty() {
        assert!(chunk_text("   \n ", MAX_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn test_rpc_payload() {
        let payload = rpc_payload("안녕", "ko", false);
        assert_eq!(
            payload,
            r#"[[["jQ1olc","[\"안녕\",\"ko\",null,\"null\"]",null,"generic"]]]"#
        );
        assert!(rpc_payload("hi", "en", true).contains(r#"\"en\",true,"#));
    }

    #[test]
    fn test_extract_audio() {
        let body = concat!(
            ")]}'\n\n123\n",
            r#"[["wrb.fr","jQ1olc","[\"ZmFrZS1tcDM=\"]",null,null,null,"generic"]]"#,
            "\n58\n[[\"di\",42]]\n"
        );
        assert_eq!(extract_audio(body).unwrap(), b"fake-mp3");
    }

    #[test]
    fn test_extract_audio_missing() {
        let result = extract_audio(")]}'\n\n[[\"e\",4,null,null,100]]");
        assert!(matches!(result, Err(MygeminiError::Speech(_))));
    }

    #[test]
    fn test_temp_file_name() {
        let name = temp_file_name();
        assert!(is_temp_file(&name));
        assert_ne!(name, temp_file_name());
    }

    #[test]
    fn test_sweep_stale_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(temp_file_name()), b"x").unwrap();
        std::fs::write(temp_dir.path().join(temp_file_name()), b"x").unwrap();
        std::fs::write(temp_dir.path().join("keep.mp3"), b"x").unwrap();

        assert_eq!(sweep_stale_files(temp_dir.path()), 2);
        assert!(temp_dir.path().join("keep.mp3").exists());
        assert_eq!(sweep_stale_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_sweep_missing_dir() {
        assert_eq!(sweep_stale_files(Path::new("/nonexistent/mygemini-speech")), 0);
    }

    #[test]
    fn test_worker_shutdown_with_empty_queue() {
        let mut worker = SpeechWorker::spawn(SpeechConfig::default()).unwrap();
        worker.say("   ");
        worker.shutdown();
        worker.say("after shutdown");
    }
}

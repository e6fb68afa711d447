//! Cipher engine: one dedicated worker thread per engine
//!
//! Argon2id and bulk AEAD work must never run on an async executor thread.
//! Each [`CipherEngine`] owns an OS thread that pulls jobs off a bounded
//! channel and runs them in order; every public method sends a job and awaits
//! its reply on a oneshot. Jobs on one engine never overlap.
//!
//! Stream state is moved into `push_chunk` / `pull_chunk` and handed back
//! with the result, so a stream can have at most one call in flight and can
//! never be reused after it fails.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use nimbus_core::config::EngineConfig;
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_crypto::{
    BoxPublicKey, BoxSecretKey, CryptoResult, DecryptionStream, EncryptionStream, GeneratedKeys,
    KdfParams, KeyBundle, MasterKey, MetadataBundle, NodeKey, NodeMetadata, ParentKey,
    PasswordHash, PulledChunk, StreamHeader, UnlockedKeys, UserCryptoProperties, NONCE_SIZE,
    SALT_SIZE,
};
use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Owned form of [`ParentKey`], for sending to the worker.
#[derive(Debug, Clone)]
pub enum ParentSecret {
    Master(MasterKey),
    Folder(NodeKey),
}

impl ParentSecret {
    pub fn as_parent(&self) -> ParentKey<'_> {
        match self {
            ParentSecret::Master(k) => ParentKey::Master(k),
            ParentSecret::Folder(k) => ParentKey::Folder(k),
        }
    }
}

struct Inner {
    id: usize,
    tx: mpsc::Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a cipher worker. Cheap to clone; all clones share one thread.
#[derive(Clone)]
pub struct CipherEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherEngine")
            .field("id", &self.inner.id)
            .finish()
    }
}

static NEXT_ENGINE_ID: AtomicUsize = AtomicUsize::new(0);

impl CipherEngine {
    /// Spawn the worker thread.
    pub fn start(config: &EngineConfig) -> NimbusResult<Self> {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));

        let worker = std::thread::Builder::new()
            .name(format!("nimbus-cipher-{id}"))
            .spawn(move || worker_loop(id, rx))?;

        info!(engine = id, queue_depth = config.queue_depth, "cipher engine started");
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Stop the worker after already-queued jobs finish, and join it.
    ///
    /// Later calls on any clone of this handle fail with [`NimbusError::Engine`].
    pub async fn shutdown(&self) -> NimbusResult<()> {
        let handle = self
            .inner
            .worker
            .lock()
            .map_err(|_| NimbusError::Engine("engine handle lock poisoned".into()))?
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        // The worker may already be gone if a previous shutdown raced us.
        let _ = self.inner.tx.send(Message::Shutdown).await;
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| NimbusError::Engine(format!("joining worker: {e}")))?
            .map_err(|_| NimbusError::Engine("cipher worker panicked".into()))?;

        info!(engine = self.inner.id, "cipher engine stopped");
        Ok(())
    }

    /// Run `f` on the worker and await its result.
    async fn run<T, F>(&self, op: &'static str, f: F) -> NimbusResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.inner
            .tx
            .send(Message::Run(job))
            .await
            .map_err(|_| NimbusError::Engine(format!("{op}: engine is shut down")))?;
        reply_rx
            .await
            .map_err(|_| NimbusError::Engine(format!("{op}: job aborted by the worker")))
    }

    async fn run_crypto<T, F>(&self, op: &'static str, f: F) -> NimbusResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> CryptoResult<T> + Send + 'static,
    {
        Ok(self.run(op, f).await??)
    }

    // ── Key derivation and hierarchy ─────────────────────────────────────

    pub async fn derive_from_password(
        &self,
        password: SecretString,
        salt: [u8; SALT_SIZE],
        params: KdfParams,
    ) -> NimbusResult<PasswordHash> {
        self.run_crypto("derive_from_password", move || {
            nimbus_crypto::derive_from_password(&password, &salt, &params)
        })
        .await
    }

    pub async fn generate_required_keys(
        &self,
        password: SecretString,
        params: KdfParams,
    ) -> NimbusResult<GeneratedKeys> {
        self.run_crypto("generate_required_keys", move || {
            nimbus_crypto::generate_required_keys(&password, &params)
        })
        .await
    }

    pub async fn decrypt_required_keys(
        &self,
        password: SecretString,
        props: UserCryptoProperties,
    ) -> NimbusResult<UnlockedKeys> {
        self.run_crypto("decrypt_required_keys", move || {
            nimbus_crypto::decrypt_required_keys(&password, &props)
        })
        .await
    }

    pub async fn recovery_mnemonic(
        &self,
        password: SecretString,
        props: UserCryptoProperties,
    ) -> NimbusResult<SecretString> {
        self.run_crypto("recovery_mnemonic", move || {
            nimbus_crypto::recovery_mnemonic(&password, &props)
        })
        .await
    }

    pub async fn recover_with_mnemonic(
        &self,
        mnemonic: SecretString,
        new_password: SecretString,
        props: UserCryptoProperties,
        params: KdfParams,
    ) -> NimbusResult<UserCryptoProperties> {
        self.run_crypto("recover_with_mnemonic", move || {
            nimbus_crypto::recover_with_mnemonic(&mnemonic, &new_password, &props, &params)
        })
        .await
    }

    pub async fn change_password(
        &self,
        old_password: SecretString,
        new_password: SecretString,
        props: UserCryptoProperties,
        params: KdfParams,
    ) -> NimbusResult<UserCryptoProperties> {
        self.run_crypto("change_password", move || {
            nimbus_crypto::change_password(&old_password, &new_password, &props, &params)
        })
        .await
    }

    pub async fn asymmetric_decrypt(
        &self,
        ciphertext: Vec<u8>,
        nonce: [u8; NONCE_SIZE],
        sender_public: BoxPublicKey,
        recipient_secret: BoxSecretKey,
    ) -> NimbusResult<Zeroizing<Vec<u8>>> {
        self.run_crypto("asymmetric_decrypt", move || {
            nimbus_crypto::asymmetric_decrypt(
                &ciphertext,
                &nonce,
                &sender_public,
                &recipient_secret,
            )
        })
        .await
    }

    // ── Node keys and metadata ───────────────────────────────────────────

    pub async fn generate_node_key(
        &self,
        parent: ParentSecret,
    ) -> NimbusResult<(NodeKey, KeyBundle)> {
        self.run_crypto("generate_node_key", move || {
            nimbus_crypto::generate_node_key(parent.as_parent())
        })
        .await
    }

    pub async fn unwrap_node_key(
        &self,
        parent: ParentSecret,
        wrapped: KeyBundle,
    ) -> NimbusResult<NodeKey> {
        self.run_crypto("unwrap_node_key", move || {
            nimbus_crypto::unwrap_node_key(parent.as_parent(), &wrapped)
        })
        .await
    }

    pub async fn rewrap_node_key(
        &self,
        new_parent: ParentSecret,
        node_key: NodeKey,
    ) -> NimbusResult<KeyBundle> {
        self.run_crypto("rewrap_node_key", move || {
            nimbus_crypto::rewrap_node_key(new_parent.as_parent(), &node_key)
        })
        .await
    }

    pub async fn unwrap_breadcrumbs(
        &self,
        master: MasterKey,
        chain: Vec<KeyBundle>,
    ) -> NimbusResult<Vec<NodeKey>> {
        self.run_crypto("unwrap_breadcrumbs", move || {
            nimbus_crypto::unwrap_breadcrumbs(&master, &chain)
        })
        .await
    }

    pub async fn encrypt_metadata(
        &self,
        node_key: NodeKey,
        metadata: NodeMetadata,
    ) -> NimbusResult<MetadataBundle> {
        self.run_crypto("encrypt_metadata", move || {
            nimbus_crypto::encrypt_metadata(&node_key, &metadata)
        })
        .await
    }

    pub async fn decrypt_metadata(
        &self,
        node_key: NodeKey,
        bundle: MetadataBundle,
    ) -> NimbusResult<NodeMetadata> {
        self.run_crypto("decrypt_metadata", move || {
            nimbus_crypto::decrypt_metadata(&node_key, &bundle)
        })
        .await
    }

    // ── Streams ──────────────────────────────────────────────────────────

    pub async fn init_encryption(
        &self,
        file_key: NodeKey,
    ) -> NimbusResult<(EncryptionStream, StreamHeader)> {
        self.run_crypto("init_encryption", move || {
            nimbus_crypto::init_encryption(&file_key)
        })
        .await
    }

    pub async fn push_chunk(
        &self,
        mut stream: EncryptionStream,
        plaintext: Bytes,
        is_final: bool,
    ) -> NimbusResult<(EncryptionStream, Vec<u8>)> {
        self.run_crypto("push_chunk", move || {
            let ciphertext = stream.push_chunk(&plaintext, is_final)?;
            Ok((stream, ciphertext))
        })
        .await
    }

    pub async fn init_decryption(
        &self,
        header: StreamHeader,
        file_key: NodeKey,
    ) -> NimbusResult<DecryptionStream> {
        self.run_crypto("init_decryption", move || {
            nimbus_crypto::init_decryption(header.as_bytes(), &file_key)
        })
        .await
    }

    pub async fn pull_chunk(
        &self,
        mut stream: DecryptionStream,
        ciphertext: Bytes,
    ) -> NimbusResult<(DecryptionStream, PulledChunk)> {
        self.run_crypto("pull_chunk", move || {
            let chunk = stream.pull_chunk(&ciphertext)?;
            Ok((stream, chunk))
        })
        .await
    }
}

fn worker_loop(id: usize, mut rx: mpsc::Receiver<Message>) {
    debug!(engine = id, "cipher worker running");
    let mut jobs: u64 = 0;
    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Run(job) => {
                jobs += 1;
                // A panicking job drops its reply sender; the caller sees an
                // engine error and the worker keeps serving.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!(engine = id, "cipher job panicked");
                }
            }
            Message::Shutdown => break,
        }
    }
    debug!(engine = id, jobs, "cipher worker exiting");
}

/// A fixed set of engines handed out round-robin, one per concurrent stream.
#[derive(Debug, Clone)]
pub struct EnginePool {
    engines: Arc<[CipherEngine]>,
    next: Arc<AtomicUsize>,
}

impl EnginePool {
    pub fn start(size: usize, config: &EngineConfig) -> NimbusResult<Self> {
        if size == 0 {
            return Err(NimbusError::Config("engine pool size must be > 0".into()));
        }
        let engines = (0..size)
            .map(|_| CipherEngine::start(config))
            .collect::<NimbusResult<Vec<_>>>()?;
        Ok(Self {
            engines: engines.into(),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// The engine for the next independent stream.
    pub fn next(&self) -> &CipherEngine {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.engines.len();
        &self.engines[i]
    }

    pub async fn shutdown(&self) -> NimbusResult<()> {
        for engine in self.engines.iter() {
            engine.shutdown().await?;
        }
        Ok(())
    }
}

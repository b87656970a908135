//! Reversible stand-in for the cipher collaborator.
//!
//! Ciphertext is the key rendered as bits, a `|` separator, then the reversed
//! plaintext. Decryption checks the key prefix, so a decrypt issued with a
//! different key than the encrypt fails the way a real AEAD tag check would.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bb84_core::Environment;
use bb84_proto::{Bit, Ciphertext};
use bb84_runtime::{CipherProvider, CollaboratorError};

use crate::fault::{CipherFault, FaultQueue};

/// Cipher with scripted latency and faults per direction.
#[derive(Debug)]
pub struct ScriptedCipher<E> {
    env: E,
    latency: Duration,
    encrypt_faults: FaultQueue<CipherFault>,
    decrypt_faults: FaultQueue<CipherFault>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl<E: Environment> ScriptedCipher<E> {
    /// Cipher answering after 10 ms.
    pub fn new(env: E) -> Self {
        Self {
            env,
            latency: Duration::from_millis(10),
            encrypt_faults: FaultQueue::new(),
            decrypt_faults: FaultQueue::new(),
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
        }
    }

    /// Answer every unfaulted call after `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script a fault for the next unscripted encrypt call.
    pub fn push_encrypt_fault(&self, fault: CipherFault) {
        self.encrypt_faults.push(fault);
    }

    /// Script a fault for the next unscripted decrypt call.
    pub fn push_decrypt_fault(&self, fault: CipherFault) {
        self.decrypt_faults.push(fault);
    }

    /// Number of encrypt calls received.
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    /// Number of decrypt calls received.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Sleep for the call's latency and surface a scripted rejection.
    async fn settle(&self, fault: Option<CipherFault>) -> Result<(), CollaboratorError> {
        let delay = match fault {
            Some(CipherFault::Delay(delay)) => delay,
            _ => self.latency,
        };
        self.env.sleep(delay).await;

        match fault {
            Some(CipherFault::Reject(message)) => Err(CollaboratorError::Rejected { message }),
            Some(CipherFault::Delay(_)) | None => Ok(()),
        }
    }
}

#[async_trait]
impl<E: Environment> CipherProvider for ScriptedCipher<E> {
    async fn encrypt(&self, plaintext: &str, key: &[Bit]) -> Result<Ciphertext, CollaboratorError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.settle(self.encrypt_faults.next()).await?;

        seal(plaintext, key).map_err(|message| CollaboratorError::Rejected { message })
    }

    async fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        key: &[Bit],
    ) -> Result<String, CollaboratorError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.settle(self.decrypt_faults.next()).await?;

        open(ciphertext, key).map_err(|message| CollaboratorError::Rejected { message })
    }
}

/// Encrypt synchronously. Fails on an empty key.
pub fn seal(plaintext: &str, key: &[Bit]) -> Result<Ciphertext, String> {
    if key.is_empty() {
        return Err("Empty key bits, cannot derive final key".into());
    }
    let reversed: String = plaintext.chars().rev().collect();
    Ok(Ciphertext::new(format!("{}|{}", render(key), reversed)))
}

/// Decrypt synchronously. Fails unless `key` is the sealing key.
pub fn open(ciphertext: &Ciphertext, key: &[Bit]) -> Result<String, String> {
    let (prefix, body) =
        ciphertext.as_str().split_once('|').ok_or_else(|| "malformed ciphertext".to_string())?;
    if prefix != render(key) {
        return Err("MAC check failed".into());
    }
    Ok(body.chars().rev().collect())
}

fn render(key: &[Bit]) -> String {
    key.iter().map(ToString::to_string).collect()
}

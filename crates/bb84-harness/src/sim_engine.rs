//! In-process BB84 exchange engine.
//!
//! Stands in for the remote simulator. Every random choice is drawn from the
//! [`Environment`], so a seeded [`SimEnv`](crate::SimEnv) makes a batch fully
//! reproducible.
//!
//! Per qubit:
//!
//! ```text
//!   sender picks bit + basis ──► [interceptor measures in a random basis
//!                                 with probability p, then resends]
//!                             ──► receiver measures in a random basis
//! ```
//!
//! Measuring in the preparation basis returns the prepared bit; measuring in
//! the conjugate basis returns a fair coin.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bb84_core::Environment;
use bb84_proto::{BatchRequest, Basis, Bit, ExchangeBatch, ExchangeRecord, ReportedResults};
use bb84_runtime::{CollaboratorError, ExchangeEngine};

use crate::fault::{EngineFault, FaultQueue};

/// Simulated exchange engine with scripted latency and faults.
#[derive(Debug)]
pub struct SimEngine<E> {
    env: E,
    latency: Duration,
    channel_noise: f64,
    faults: FaultQueue<EngineFault>,
    calls: AtomicUsize,
}

impl<E: Environment> SimEngine<E> {
    /// Noise-free engine answering after 50 ms.
    pub fn new(env: E) -> Self {
        Self {
            env,
            latency: Duration::from_millis(50),
            channel_noise: 0.0,
            faults: FaultQueue::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every unfaulted call after `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Flip each received bit with probability `noise`.
    #[must_use]
    pub fn with_channel_noise(mut self, noise: f64) -> Self {
        self.channel_noise = noise;
        self
    }

    /// Script a fault for the next unscripted call.
    pub fn push_fault(&self, fault: EngineFault) {
        self.faults.push(fault);
    }

    /// Number of `generate` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Environment> ExchangeEngine for SimEngine<E> {
    async fn generate(&self, request: &BatchRequest) -> Result<ExchangeBatch, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.faults.next();

        let delay = match fault {
            Some(EngineFault::Delay(delay)) => delay,
            _ => self.latency,
        };
        self.env.sleep(delay).await;

        match fault {
            Some(EngineFault::Reject(message)) => Err(CollaboratorError::Rejected { message }),
            Some(EngineFault::ShortBatch(missing)) => {
                let mut batch = exchange(&self.env, request, self.channel_noise);
                let keep = batch.records.len().saturating_sub(missing);
                batch.records.truncate(keep);
                Ok(batch)
            },
            Some(EngineFault::Delay(_)) | None => {
                Ok(exchange(&self.env, request, self.channel_noise))
            },
        }
    }
}

/// Run one exchange synchronously.
///
/// Reported values follow the remote engine: sifted and receiver keys at
/// basis-matched positions, interceptor bits only at basis-matched
/// positions, and the error rate over the sifted pair as a fraction.
pub fn exchange(
    env: &impl Environment,
    request: &BatchRequest,
    channel_noise: f64,
) -> ExchangeBatch {
    let records: Vec<ExchangeRecord> = (0..request.particle_count)
        .map(|_| qubit(env, request.interception_probability, channel_noise))
        .collect();

    let matched: Vec<&ExchangeRecord> = records.iter().filter(|r| r.bases_match()).collect();
    let sifted_key: Vec<Bit> = matched.iter().map(|r| r.sender_bit()).collect();
    let receiver_key: Vec<Bit> = matched.iter().map(|r| r.receiver_bit()).collect();
    let interceptor_key = matched.iter().filter_map(|r| r.interceptor_bit()).collect();
    let errors = sifted_key.iter().zip(&receiver_key).filter(|(a, b)| a != b).count();
    let error_rate =
        if sifted_key.is_empty() { 0.0 } else { errors as f64 / sifted_key.len() as f64 };

    ExchangeBatch {
        records,
        reported: ReportedResults { sifted_key, receiver_key, interceptor_key, error_rate },
    }
}

fn qubit(env: &impl Environment, interception_probability: f64, noise: f64) -> ExchangeRecord {
    let sender_bit = random_bit(env);
    let sender_basis = random_basis(env);
    let receiver_basis = random_basis(env);

    let (sent_bit, sent_basis, interceptor_bit) = if env.random_bool(interception_probability) {
        let basis = random_basis(env);
        let bit = measure(env, sender_bit, sender_basis, basis);
        (bit, basis, Some(bit))
    } else {
        (sender_bit, sender_basis, None)
    };

    let mut receiver_bit = measure(env, sent_bit, sent_basis, receiver_basis);
    if env.random_bool(noise) {
        receiver_bit = flip(receiver_bit);
    }

    ExchangeRecord::new(sender_bit, sender_basis, receiver_basis, receiver_bit, interceptor_bit)
}

fn measure(env: &impl Environment, bit: Bit, prepared: Basis, measured: Basis) -> Bit {
    if prepared == measured { bit } else { random_bit(env) }
}

fn flip(bit: Bit) -> Bit {
    Bit::from_lsb(bit.as_u8() ^ 1)
}

fn random_bit(env: &impl Environment) -> Bit {
    Bit::from_lsb(random_byte(env))
}

fn random_basis(env: &impl Environment) -> Basis {
    Basis::from_lsb(random_byte(env))
}

fn random_byte(env: &impl Environment) -> u8 {
    let mut byte = [0u8; 1];
    env.random_bytes(&mut byte);
    byte[0]
}

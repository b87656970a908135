//! The production runtime wired to simulated collaborators.

use std::sync::Arc;

use bb84_runtime::{Runtime, RuntimeConfig, RuntimeHandle};

use crate::{Observer, ScriptedCipher, SimEngine, SimEnv};

/// A spawned [`Runtime`] plus handles to everything around it.
///
/// Must be created inside a Turmoil host so the runtime task and every
/// collaborator call run on virtual time.
#[derive(Debug)]
pub struct SimRuntime {
    /// Shared environment.
    pub env: SimEnv,
    /// Engine, for scripting faults and counting calls.
    pub engine: Arc<SimEngine<SimEnv>>,
    /// Cipher, for scripting faults and counting calls.
    pub cipher: Arc<ScriptedCipher<SimEnv>>,
    /// Command handle.
    pub handle: RuntimeHandle,
    /// Notice capture.
    pub observer: Observer<SimEnv>,
}

impl SimRuntime {
    /// Default collaborators and config, randomness from `seed`.
    pub fn spawn(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        Self::spawn_with(
            env.clone(),
            SimEngine::new(env.clone()),
            ScriptedCipher::new(env),
            RuntimeConfig::default(),
        )
    }

    /// Explicit collaborators and config.
    pub fn spawn_with(
        env: SimEnv,
        engine: SimEngine<SimEnv>,
        cipher: ScriptedCipher<SimEnv>,
        config: RuntimeConfig,
    ) -> Self {
        let engine = Arc::new(engine);
        let cipher = Arc::new(cipher);
        let (runtime, handle, notices) =
            Runtime::new(env.clone(), Arc::clone(&engine), Arc::clone(&cipher), config);
        tokio::spawn(runtime.run());

        Self { observer: Observer::new(env.clone(), notices), env, engine, cipher, handle }
    }
}

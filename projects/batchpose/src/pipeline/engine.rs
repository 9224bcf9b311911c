//! Worker resources: the transformation engines and how workers obtain them.
//!
//! A worker never touches an engine it does not hold a lease on, so no engine
//! is ever invoked from two threads at once. [`DedicatedEngines`] builds one
//! engine per worker; [`EnginePool`] shares a fixed set of engines, handing
//! each to one lease at a time.

use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A per-frame transformation. Synchronous and possibly slow.
pub trait FrameTransform<F> {
    fn transform(&mut self, frame: &F) -> Result<F>;
}

/// Strategy for obtaining and returning engines.
pub trait EngineProvider<E>: Send + Sync {
    /// Builds or checks out an engine. May block.
    fn acquire(&self) -> Result<E>;
    /// Tears down or returns an engine obtained from `acquire`.
    fn release(&self, engine: E);
}

type EngineFactory<E> = Box<dyn Fn() -> Result<E> + Send + Sync>;

/// One freshly constructed engine per acquisition.
pub struct DedicatedEngines<E> {
    factory: EngineFactory<E>,
}

impl<E> DedicatedEngines<E> {
    pub fn new<T>(factory: T) -> Self
    where
        T: Fn() -> Result<E> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl<E> EngineProvider<E> for DedicatedEngines<E> {
    fn acquire(&self) -> Result<E> {
        tracing::info!("Loading engine");
        (self.factory)()
    }

    fn release(&self, engine: E) {
        drop(engine);
        tracing::info!("Unloading engine");
    }
}

/// A fixed set of engines shared by more workers than it holds.
pub struct EnginePool<E> {
    idle_tx: Sender<E>,
    idle_rx: Receiver<E>,
    size: usize,
}

impl<E: Send> EnginePool<E> {
    /// Builds up to `size` engines. Ones that fail to construct are logged and skipped.
    pub fn new<T>(size: usize, factory: T) -> Self
    where
        T: Fn() -> Result<E>,
    {
        let (idle_tx, idle_rx) = channel::bounded(size.max(1));
        let mut built = 0;
        for slot in 0..size {
            match factory() {
                Ok(engine) => {
                    // Capacity equals size, so this never blocks.
                    if idle_tx.send(engine).is_ok() {
                        built += 1;
                    }
                }
                Err(e) => tracing::error!("Pooled engine {} failed to load: {:#}", slot, e),
            }
        }
        tracing::info!("Engine pool ready with {} of {} engines", built, size);

        Self {
            idle_tx,
            idle_rx,
            size: built,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl<E: Send> EngineProvider<E> for EnginePool<E> {
    fn acquire(&self) -> Result<E> {
        if self.size == 0 {
            return Err(anyhow!("engine pool has no loaded engines"));
        }
        // The pool keeps its own sender, so this only ever waits for a release.
        self.idle_rx
            .recv()
            .map_err(|_| anyhow!("engine pool disconnected"))
    }

    fn release(&self, engine: E) {
        if self.idle_tx.send(engine).is_err() {
            tracing::warn!("Engine pool closed; dropping returned engine");
        }
    }
}

/// Scoped ownership of one engine.
///
/// Returned to its provider by [`EngineLease::release`], or on drop when a
/// worker leaves early.
pub struct EngineLease<E> {
    engine: Option<E>,
    provider: Arc<dyn EngineProvider<E>>,
}

impl<E> EngineLease<E> {
    pub fn acquire(provider: &Arc<dyn EngineProvider<E>>) -> Result<Self> {
        let engine = provider.acquire()?;
        Ok(Self {
            engine: Some(engine),
            provider: Arc::clone(provider),
        })
    }

    pub fn release(mut self) {
        if let Some(engine) = self.engine.take() {
            self.provider.release(engine);
        }
    }
}

impl<E> Deref for EngineLease<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine.as_ref().expect("engine is held until release")
    }
}

impl<E> DerefMut for EngineLease<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine.as_mut().expect("engine is held until release")
    }
}

impl<E> Drop for EngineLease<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.provider.release(engine);
        }
    }
}

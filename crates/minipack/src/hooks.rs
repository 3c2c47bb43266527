//! Named extension points that plugins subscribe to
//!
//! A [`HookRegistry`] holds every extension point of a build, keyed by name.
//! Each point is declared once with a [`HookKind`], a positional argument
//! signature and the Rust type of its argument. Two kinds exist:
//!
//! - [`HookKind::Sync`]: handlers run in subscription order on the caller's
//!   thread and receive `&mut A`. The first failing handler aborts the fire.
//! - [`HookKind::AsyncParallel`]: handlers receive a shared `Arc<A>` and run
//!   concurrently. Firing completes once every handler has settled; a failure
//!   is reported after that, and other in-flight handlers are not cancelled.
//!
//! Subscribing after a point has fired is rejected so that handler order can
//! never change under a running build.

use std::{
    any::{Any, type_name},
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, join_all},
};
use log::{debug, trace};
use thiserror::Error;

use crate::{error::BoxError, types::FxIndexMap};

/// How the handlers of an extension point are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Sequential fan-out on the calling thread, fail-fast
    Sync,
    /// Concurrent fan-out that waits for every handler to settle
    AsyncParallel,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::AsyncParallel => write!(f, "async parallel"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("unknown hook '{name}'")]
    UnknownHook { name: String },

    #[error("hook '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("cannot subscribe '{handler}' to hook '{name}' after it has fired")]
    LateSubscription { name: String, handler: String },

    #[error("hook '{name}' is {actual}, not {expected}")]
    KindMismatch {
        name: String,
        expected: HookKind,
        actual: HookKind,
    },

    #[error("hook '{name}' takes ({signature}) as `{expected}`, got `{found}`")]
    SignatureMismatch {
        name: String,
        signature: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("handler '{handler}' on hook '{name}' failed")]
    Handler {
        name: String,
        handler: String,
        #[source]
        source: BoxError,
    },
}

/// Handler of a [`HookKind::Sync`] point
pub type SyncHandler<A> = Box<dyn Fn(&mut A) -> anyhow::Result<()> + Send + Sync>;

/// Handler of a [`HookKind::AsyncParallel`] point
pub type AsyncHandler<A> =
    Box<dyn Fn(Arc<A>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Completion callback handed to [`HookRegistry::tap_async`] handlers
pub type Callback = Box<dyn FnOnce(Option<anyhow::Error>) + Send>;

struct Tap<H> {
    name: String,
    handler: H,
}

struct HookPoint {
    kind: HookKind,
    signature: Vec<String>,
    arg_type: &'static str,
    tap_names: Vec<String>,
    fired: AtomicBool,
    /// `Vec<Tap<SyncHandler<A>>>` or `Vec<Tap<AsyncHandler<A>>>`
    taps: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPoint")
            .field("kind", &self.kind)
            .field("signature", &self.signature)
            .field("arg_type", &self.arg_type)
            .field("taps", &self.tap_names)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}

/// Registry of named extension points
#[derive(Debug, Default)]
pub struct HookRegistry {
    points: FxIndexMap<String, HookPoint>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an extension point whose handlers receive an `A`
    ///
    /// `signature` names the positional arguments carried by `A`; it is used
    /// in diagnostics only.
    pub fn register<A: Send + Sync + 'static>(
        &mut self,
        name: &str,
        kind: HookKind,
        signature: &[&str],
    ) -> Result<(), HookError> {
        if self.points.contains_key(name) {
            return Err(HookError::AlreadyRegistered {
                name: name.to_owned(),
            });
        }

        let taps: Box<dyn Any + Send + Sync> = match kind {
            HookKind::Sync => Box::new(Vec::<Tap<SyncHandler<A>>>::new()),
            HookKind::AsyncParallel => Box::new(Vec::<Tap<AsyncHandler<A>>>::new()),
        };

        debug!("Registered {kind} hook '{name}'({})", signature.join(", "));
        self.points.insert(
            name.to_owned(),
            HookPoint {
                kind,
                signature: signature.iter().map(|s| (*s).to_owned()).collect(),
                arg_type: type_name::<A>(),
                tap_names: Vec::new(),
                fired: AtomicBool::new(false),
                taps,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.points.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Result<HookKind, HookError> {
        Ok(self.point(name)?.kind)
    }

    /// Names of the handlers subscribed to `name`, in invocation order
    pub fn handlers(&self, name: &str) -> Result<&[String], HookError> {
        Ok(&self.point(name)?.tap_names)
    }

    /// Subscribe a handler to a [`HookKind::Sync`] point
    pub fn tap<A, F>(&mut self, name: &str, handler_name: &str, handler: F) -> Result<(), HookError>
    where
        A: 'static,
        F: Fn(&mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (tap_names, taps) = self.subscribable::<Vec<Tap<SyncHandler<A>>>>(
            name,
            handler_name,
            HookKind::Sync,
            type_name::<A>(),
        )?;
        tap_names.push(handler_name.to_owned());
        taps.push(Tap {
            name: handler_name.to_owned(),
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Subscribe a future-returning handler to a [`HookKind::AsyncParallel`] point
    pub fn tap_promise<A, F, Fut>(
        &mut self,
        name: &str,
        handler_name: &str,
        handler: F,
    ) -> Result<(), HookError>
    where
        A: Send + Sync + 'static,
        F: Fn(Arc<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: AsyncHandler<A> = Box::new(move |args| handler(args).boxed());
        self.push_async(name, handler_name, boxed)
    }

    /// Subscribe a callback-completing handler to a [`HookKind::AsyncParallel`] point
    ///
    /// The handler must eventually invoke the [`Callback`] it receives; dropping
    /// it unused counts as a failure.
    pub fn tap_async<A, F>(
        &mut self,
        name: &str,
        handler_name: &str,
        handler: F,
    ) -> Result<(), HookError>
    where
        A: Send + Sync + 'static,
        F: Fn(Arc<A>, Callback) + Send + Sync + 'static,
    {
        let boxed: AsyncHandler<A> = Box::new(move |args| {
            let (tx, rx) = oneshot::channel::<Option<anyhow::Error>>();
            handler(
                args,
                Box::new(move |outcome| {
                    // The fire may already have been dropped by its caller
                    let _ = tx.send(outcome);
                }),
            );
            async move {
                match rx.await {
                    Ok(None) => Ok(()),
                    Ok(Some(err)) => Err(err),
                    Err(oneshot::Canceled) => Err(anyhow::anyhow!(
                        "completion callback was dropped without being called"
                    )),
                }
            }
            .boxed()
        });
        self.push_async(name, handler_name, boxed)
    }

    /// Fire a [`HookKind::Sync`] point
    pub fn call<A: 'static>(&self, name: &str, args: &mut A) -> Result<(), HookError> {
        let taps =
            self.fireable::<Vec<Tap<SyncHandler<A>>>>(name, HookKind::Sync, type_name::<A>())?;

        for tap in taps {
            trace!("Calling handler '{}' on hook '{name}'", tap.name);
            (tap.handler)(args).map_err(|source| HookError::Handler {
                name: name.to_owned(),
                handler: tap.name.clone(),
                source: source.into(),
            })?;
        }
        Ok(())
    }

    /// Fire a [`HookKind::AsyncParallel`] point and wait for every handler
    pub async fn promise<A: Send + Sync + 'static>(
        &self,
        name: &str,
        args: A,
    ) -> Result<(), HookError> {
        let taps = self.fireable::<Vec<Tap<AsyncHandler<A>>>>(
            name,
            HookKind::AsyncParallel,
            type_name::<A>(),
        )?;

        let args = Arc::new(args);
        trace!("Starting {} handlers on hook '{name}'", taps.len());
        let outcomes = join_all(taps.iter().map(|tap| (tap.handler)(Arc::clone(&args)))).await;

        for (tap, outcome) in taps.iter().zip(outcomes) {
            if let Err(source) = outcome {
                return Err(HookError::Handler {
                    name: name.to_owned(),
                    handler: tap.name.clone(),
                    source: source.into(),
                });
            }
        }
        Ok(())
    }

    /// Fire a [`HookKind::AsyncParallel`] point, reporting completion through `callback`
    pub async fn call_async<A, F>(&self, name: &str, args: A, callback: F)
    where
        A: Send + Sync + 'static,
        F: FnOnce(Option<HookError>),
    {
        callback(self.promise(name, args).await.err());
    }

    fn point(&self, name: &str) -> Result<&HookPoint, HookError> {
        self.points.get(name).ok_or_else(|| HookError::UnknownHook {
            name: name.to_owned(),
        })
    }

    fn push_async<A: 'static>(
        &mut self,
        name: &str,
        handler_name: &str,
        handler: AsyncHandler<A>,
    ) -> Result<(), HookError> {
        let (tap_names, taps) = self.subscribable::<Vec<Tap<AsyncHandler<A>>>>(
            name,
            handler_name,
            HookKind::AsyncParallel,
            type_name::<A>(),
        )?;
        tap_names.push(handler_name.to_owned());
        taps.push(Tap {
            name: handler_name.to_owned(),
            handler,
        });
        Ok(())
    }

    fn subscribable<T: 'static>(
        &mut self,
        name: &str,
        handler_name: &str,
        kind: HookKind,
        found: &'static str,
    ) -> Result<(&mut Vec<String>, &mut T), HookError> {
        let point = self
            .points
            .get_mut(name)
            .ok_or_else(|| HookError::UnknownHook {
                name: name.to_owned(),
            })?;
        check_kind(name, point, kind)?;
        if *point.fired.get_mut() {
            return Err(HookError::LateSubscription {
                name: name.to_owned(),
                handler: handler_name.to_owned(),
            });
        }

        let mismatch = signature_mismatch(name, point, found);
        let HookPoint {
            tap_names, taps, ..
        } = point;
        let taps = taps.downcast_mut::<T>().ok_or(mismatch)?;
        debug!("Subscribed '{handler_name}' to hook '{name}'");
        Ok((tap_names, taps))
    }

    fn fireable<T: 'static>(
        &self,
        name: &str,
        kind: HookKind,
        found: &'static str,
    ) -> Result<&T, HookError> {
        let point = self.point(name)?;
        check_kind(name, point, kind)?;
        let taps = point
            .taps
            .downcast_ref::<T>()
            .ok_or_else(|| signature_mismatch(name, point, found))?;
        point.fired.store(true, Ordering::SeqCst);
        Ok(taps)
    }
}

fn check_kind(name: &str, point: &HookPoint, expected: HookKind) -> Result<(), HookError> {
    if point.kind == expected {
        Ok(())
    } else {
        Err(HookError::KindMismatch {
            name: name.to_owned(),
            expected,
            actual: point.kind,
        })
    }
}

fn signature_mismatch(name: &str, point: &HookPoint, found: &'static str) -> HookError {
    HookError::SignatureMismatch {
        name: name.to_owned(),
        signature: point.signature.join(", "),
        expected: point.arg_type,
        found,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::{sync::Barrier, time::timeout};

    use super::*;

    fn sync_registry() -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry
            .register::<Vec<String>>("accelerate", HookKind::Sync, &["newSpeed"])
            .unwrap();
        registry
    }

    fn async_registry() -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry
            .register::<AtomicUsize>("calculateRoutes", HookKind::AsyncParallel, &["routes"])
            .unwrap();
        registry
    }

    #[test]
    fn test_sync_handlers_run_in_subscription_order() {
        let mut registry = sync_registry();
        for name in ["first", "second", "third"] {
            registry
                .tap("accelerate", name, move |seen: &mut Vec<String>| {
                    seen.push(name.to_owned());
                    Ok(())
                })
                .unwrap();
        }

        let mut seen: Vec<String> = Vec::new();
        registry.call("accelerate", &mut seen).unwrap();

        assert_eq!(seen, vec!["first", "second", "third"]);
        assert_eq!(
            registry.handlers("accelerate").unwrap(),
            &["first", "second", "third"]
        );
    }

    #[test]
    fn test_sync_failure_stops_later_handlers() {
        let mut registry = sync_registry();
        registry
            .tap("accelerate", "ok", |seen: &mut Vec<String>| {
                seen.push("ok".into());
                Ok(())
            })
            .unwrap();
        registry
            .tap("accelerate", "broken", |_: &mut Vec<String>| {
                anyhow::bail!("engine stalled")
            })
            .unwrap();
        registry
            .tap("accelerate", "never", |seen: &mut Vec<String>| {
                seen.push("never".into());
                Ok(())
            })
            .unwrap();

        let mut seen: Vec<String> = Vec::new();
        let err = registry.call("accelerate", &mut seen).unwrap_err();

        assert_eq!(seen, vec!["ok"]);
        assert!(matches!(
            &err,
            HookError::Handler { name, handler, .. } if name == "accelerate" && handler == "broken"
        ));
        assert_eq!(
            std::error::Error::source(&err).unwrap().to_string(),
            "engine stalled"
        );
    }

    #[test]
    fn test_unknown_hook_is_an_error() {
        let mut registry = HookRegistry::new();
        let err = registry.call("missing", &mut ()).unwrap_err();
        assert!(matches!(err, HookError::UnknownHook { name } if name == "missing"));

        let err = registry
            .tap("missing", "handler", |_: &mut ()| Ok(()))
            .unwrap_err();
        assert!(matches!(err, HookError::UnknownHook { .. }));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = sync_registry();
        assert!(registry.is_registered("accelerate"));
        assert!(!registry.is_registered("brake"));
        assert_eq!(registry.kind("accelerate").unwrap(), HookKind::Sync);
        let err = registry
            .register::<Vec<String>>("accelerate", HookKind::Sync, &["newSpeed"])
            .unwrap_err();
        assert!(matches!(err, HookError::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_subscribing_after_fire_is_rejected() {
        let mut registry = sync_registry();
        registry
            .call("accelerate", &mut Vec::<String>::new())
            .unwrap();

        let err = registry
            .tap("accelerate", "late", |_: &mut Vec<String>| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            HookError::LateSubscription { name, handler } if name == "accelerate" && handler == "late"
        ));
    }

    #[test]
    fn test_kind_and_signature_are_checked() {
        let mut registry = async_registry();
        let err = registry
            .tap("calculateRoutes", "sync", |_: &mut AtomicUsize| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            HookError::KindMismatch {
                expected: HookKind::Sync,
                actual: HookKind::AsyncParallel,
                ..
            }
        ));

        let registry = sync_registry();
        let err = registry.call("accelerate", &mut 42_u32).unwrap_err();
        assert!(matches!(
            err,
            HookError::SignatureMismatch { found, .. } if found == "u32"
        ));
    }

    #[tokio::test]
    async fn test_async_parallel_runs_handlers_concurrently() {
        let mut registry = async_registry();
        // Neither handler can pass the barrier unless both are polled together
        let barrier = Arc::new(Barrier::new(2));
        for name in ["left", "right"] {
            let barrier = Arc::clone(&barrier);
            registry
                .tap_promise("calculateRoutes", name, move |routes: Arc<AtomicUsize>| {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        barrier.wait().await;
                        routes.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                })
                .unwrap();
        }

        let routes = AtomicUsize::new(0);
        timeout(
            Duration::from_secs(5),
            registry.promise("calculateRoutes", routes),
        )
        .await
        .expect("handlers should run concurrently")
        .unwrap();
    }

    #[tokio::test]
    async fn test_async_parallel_waits_for_every_handler() {
        type Routes = Arc<Mutex<Vec<&'static str>>>;

        let mut registry = HookRegistry::new();
        registry
            .register::<Routes>("calculateRoutes", HookKind::AsyncParallel, &["routes"])
            .unwrap();
        for (name, delay) in [("slow", 30), ("fast", 1)] {
            registry
                .tap_promise("calculateRoutes", name, move |routes: Arc<Routes>| async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    routes.lock().unwrap().push(name);
                    anyhow::Ok(())
                })
                .unwrap();
        }

        let routes: Routes = Arc::default();
        registry
            .promise("calculateRoutes", Arc::clone(&routes))
            .await
            .unwrap();

        assert_eq!(*routes.lock().unwrap(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_async_failure_is_reported_after_all_settle() {
        let mut registry = async_registry();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        registry
            .tap_promise("calculateRoutes", "broken", |_: Arc<AtomicUsize>| async {
                Err::<(), _>(anyhow::anyhow!("no route"))
            })
            .unwrap();
        registry
            .tap_promise("calculateRoutes", "slow", move |_: Arc<AtomicUsize>| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
            .unwrap();

        let err = registry
            .promise("calculateRoutes", AtomicUsize::new(0))
            .await
            .unwrap_err();

        assert!(matches!(err, HookError::Handler { handler, .. } if handler == "broken"));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_style_subscription_and_completion() {
        let mut registry = async_registry();
        registry
            .tap_async(
                "calculateRoutes",
                "ok",
                |routes: Arc<AtomicUsize>, done: Callback| {
                    routes.fetch_add(1, Ordering::SeqCst);
                    done(None);
                },
            )
            .unwrap();
        registry
            .tap_async(
                "calculateRoutes",
                "failing",
                |_: Arc<AtomicUsize>, done: Callback| {
                    done(Some(anyhow::anyhow!("map unavailable")));
                },
            )
            .unwrap();

        let mut reported = None;
        registry
            .call_async("calculateRoutes", AtomicUsize::new(0), |err| {
                reported = err;
            })
            .await;

        assert!(matches!(
            reported,
            Some(HookError::Handler { handler, .. }) if handler == "failing"
        ));
    }

    #[tokio::test]
    async fn test_dropped_callback_counts_as_failure() {
        let mut registry = async_registry();
        registry
            .tap_async(
                "calculateRoutes",
                "forgetful",
                |_: Arc<AtomicUsize>, done: Callback| drop(done),
            )
            .unwrap();

        let err = registry
            .promise("calculateRoutes", AtomicUsize::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Handler { handler, .. } if handler == "forgetful"));
    }

    #[tokio::test]
    async fn test_call_async_reports_success() {
        let registry = async_registry();
        let mut completed = false;
        registry
            .call_async("calculateRoutes", AtomicUsize::new(0), |err| {
                completed = err.is_none();
            })
            .await;
        assert!(completed);
    }
}

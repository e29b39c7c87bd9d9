//! Command-line verb dispatch.
//!
//! A [`CommandRegistry`] maps lowercase verbs to async handlers, checks their
//! argument count and renders the usage text. [`CommandRegistry::for_service`]
//! registers the built-in verbs (`install`, `run`, `update`, ...) for a
//! [`Service`](crate::service::Service).
//!
//! ```rust,no_run
//! use servicekit::dispatch::{Arity, CommandRegistry};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut registry = CommandRegistry::new();
//! registry.register("greet", "Print a greeting", Arity::Exact(1), true, |args| async move {
//!     println!("hello {}", args[0]);
//!     Ok(())
//! });
//! registry.parse_and_run(&["greet".to_string(), "world".to_string()]).await?;
//! # Ok(())
//! # }
//! ```

mod builtin;

use crate::core::ServiceError;
use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use strsim::levenshtein;
use tracing::debug;

/// Verb run when no arguments are given.
pub const DEFAULT_COMMAND: &str = "run";

/// Maximum edit distance, as a percentage of the typed verb's length, for a
/// "did you mean" suggestion.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

pub type Handler = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Number of arguments a verb accepts after its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Any,
}

impl Arity {
    fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(expected) => expected == count,
            Self::Any => true,
        }
    }
}

#[derive(Clone)]
struct Command {
    usage: String,
    arity: Arity,
    display: bool,
    handler: Handler,
}

#[derive(Clone, Default)]
pub struct CommandRegistry {
    order: Vec<String>,
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` (case-insensitive).
    ///
    /// Registering an existing name replaces its usage, arity and handler but
    /// keeps its position in the usage text. Hidden commands (`display ==
    /// false`) still run but are not listed.
    pub fn register<F, Fut>(
        &mut self,
        name: &str,
        usage: &str,
        arity: Arity,
        display: bool,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.to_lowercase();
        if !self.commands.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.commands.insert(
            name,
            Command {
                usage: usage.to_string(),
                arity,
                display,
                handler: Arc::new(move |args| handler(args).boxed()),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_lowercase())
    }

    /// Registered verbs in registration order, hidden ones included.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Usage text listing the visible verbs in registration order.
    pub fn usage(&self) -> String {
        let mut text = String::from("\nservice command:\n");
        for name in &self.order {
            if let Some(command) = self.commands.get(name).filter(|c| c.display) {
                text.push_str(&format!("  {name}\n  \t{}\n", command.usage));
            }
        }
        text
    }

    /// Run the verb named by `args[0]` with the remaining arguments.
    ///
    /// No arguments runs [`DEFAULT_COMMAND`].
    pub async fn parse_and_run(&self, args: &[String]) -> Result<()> {
        let Some((verb, rest)) = args.split_first() else {
            return self.run_command(DEFAULT_COMMAND, DEFAULT_COMMAND, Vec::new()).await;
        };
        self.run_command(verb, &args.join(" "), rest.to_vec()).await
    }

    async fn run_command(&self, verb: &str, line: &str, args: Vec<String>) -> Result<()> {
        let Some(command) = self.commands.get(&verb.to_lowercase()) else {
            return Err(ServiceError::UnknownCommand {
                args: line.to_string(),
                suggestion: self.suggest(verb),
            }
            .into());
        };

        if !command.arity.accepts(args.len()) {
            let expected = match command.arity {
                Arity::Exact(expected) => expected,
                Arity::Any => args.len(),
            };
            return Err(ServiceError::ArityMismatch {
                command: verb.to_string(),
                expected,
            }
            .into());
        }

        debug!("Dispatching '{verb}' with {} argument(s)", args.len());
        (command.handler)(args).await
    }

    /// Closest visible verb to `typed`, if reasonably close.
    fn suggest(&self, typed: &str) -> Option<String> {
        let typed = typed.to_lowercase();
        let limit = typed.len() * SIMILARITY_THRESHOLD_PERCENT / 100;
        self.order
            .iter()
            .filter(|name| self.commands.get(*name).is_some_and(|c| c.display))
            .map(|name| (levenshtein(&typed, name), name))
            .filter(|(distance, _)| *distance > 0 && *distance <= limit)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    type Seen = Arc<Mutex<Option<String>>>;

    fn recording(
        seen: &Seen,
    ) -> impl Fn(Vec<String>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        let seen = Arc::clone(seen);
        move |args: Vec<String>| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                *seen.lock().unwrap() = Some(args.join(","));
                Ok(())
            }) as BoxFuture<'static, Result<()>>
        }
    }

    #[tokio::test]
    async fn test_registration_usage_and_arity() {
        let seen = Arc::new(Mutex::new(None));
        let mut registry = CommandRegistry::new();
        registry.register("test", "test", Arity::Exact(2), true, recording(&seen));
        registry.register("hide", "test", Arity::Exact(2), false, recording(&seen));

        assert_eq!(registry.usage(), "\nservice command:\n  test\n  \ttest\n");

        registry.parse_and_run(&args("test a b")).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("a,b"));

        let err = registry.parse_and_run(&args("start")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ServiceError>(), Some(ServiceError::UnknownCommand { .. })));
        assert_eq!(err.to_string(), "unknown arguments: start");

        let err = registry.parse_and_run(&args("test a")).await.unwrap_err();
        assert_eq!(err.to_string(), "test need 2 arguments");

        registry.parse_and_run(&args("hide x y")).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("x,y"));
    }

    #[tokio::test]
    async fn test_verbs_are_case_insensitive() {
        let seen = Arc::new(Mutex::new(None));
        let mut registry = CommandRegistry::new();
        registry.register("Status", "Show status", Arity::Any, true, recording(&seen));

        assert!(registry.contains("STATUS"));
        registry.parse_and_run(&args("STATUS one two three")).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("one,two,three"));
        assert_eq!(registry.usage(), "\nservice command:\n  status\n  \tShow status\n");
    }

    #[tokio::test]
    async fn test_reregistering_keeps_position() {
        let seen = Arc::new(Mutex::new(None));
        let mut registry = CommandRegistry::new();
        registry.register("a", "first a", Arity::Exact(0), true, recording(&seen));
        registry.register("b", "b", Arity::Exact(0), true, recording(&seen));
        registry.register("a", "second a", Arity::Exact(1), true, recording(&seen));

        assert_eq!(registry.names(), ["a", "b"]);
        assert_eq!(registry.usage(), "\nservice command:\n  a\n  \tsecond a\n  b\n  \tb\n");
        assert!(registry.parse_and_run(&args("a")).await.is_err());
        registry.parse_and_run(&args("a z")).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_arguments_runs_default() {
        let seen = Arc::new(Mutex::new(None));
        let mut registry = CommandRegistry::new();

        let err = registry.parse_and_run(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown arguments: run");

        registry.register(DEFAULT_COMMAND, "Run", Arity::Exact(0), true, recording(&seen));
        registry.parse_and_run(&[]).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_unknown_verb_suggestion() {
        let seen = Arc::new(Mutex::new(None));
        let mut registry = CommandRegistry::new();
        registry.register("restart", "Restart", Arity::Exact(0), true, recording(&seen));
        registry.register("status", "Status", Arity::Exact(0), true, recording(&seen));

        let err = registry.parse_and_run(&args("restar now")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ServiceError>(),
            Some(&ServiceError::UnknownCommand {
                args: "restar now".to_string(),
                suggestion: Some("restart".to_string()),
            })
        );

        let err = registry.parse_and_run(&args("xyz")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::UnknownCommand { suggestion: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = CommandRegistry::new();
        registry.register("boom", "fails", Arity::Exact(0), true, |_| async {
            anyhow::bail!("boom failed")
        });
        let err = registry.parse_and_run(&args("boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "boom failed");
    }
}

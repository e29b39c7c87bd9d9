//! Built-in service verbs.

use super::{Arity, CommandRegistry};
use crate::logging;
use crate::service::Service;

impl CommandRegistry {
    /// A registry holding the standard verbs for `service`.
    ///
    /// | Verb | Action |
    /// |------|--------|
    /// | `install` / `uninstall` / `remove` | register or unregister with the OS |
    /// | `run` | run the service in the foreground |
    /// | `test` | run the self-test |
    /// | `start` / `stop` / `restart` / `status` | OS service manager control |
    /// | `update` | self-update from `update_url` |
    /// | `log` | print the log file |
    pub fn for_service(service: Service) -> Self {
        let mut registry = Self::new();

        macro_rules! verb {
            ($name:literal, $usage:literal, |$svc:ident| $body:expr) => {{
                let service = service.clone();
                registry.register($name, $usage, Arity::Exact(0), true, move |_| {
                    let $svc = service.clone();
                    async move {
                        let result: anyhow::Result<()> = { $body };
                        result
                    }
                });
            }};
        }

        verb!("install", "Install service", |svc| {
            svc.install().await?;
            println!("Service {} installed.", svc.name());
            Ok(())
        });
        verb!("uninstall", "Uninstall service", |svc| {
            svc.uninstall().await?;
            println!("Service {} uninstalled.", svc.name());
            Ok(())
        });
        verb!("remove", "Remove service, equal uninstall", |svc| {
            svc.uninstall().await?;
            println!("Service {} uninstalled.", svc.name());
            Ok(())
        });
        verb!("run", "Run service executor", |svc| svc.run().await);
        verb!("test", "Run service test executor", |svc| svc.test().await);
        verb!("start", "Start service", |svc| svc.start().await);
        verb!("stop", "Stop service", |svc| svc.stop().await);
        verb!("restart", "Restart service", |svc| svc.restart().await);
        verb!("status", "Show service status info", |svc| {
            println!("{}", svc.status().await?);
            Ok(())
        });
        verb!("update", "Update service files if update url is provided", |svc| {
            let report = svc.update().await?;
            println!(
                "Update complete: {} written, {} skipped, {} removed.",
                report.written.len(),
                report.skipped.len(),
                report.removed.len()
            );
            Ok(())
        });
        verb!("log", "Display log if present", |svc| {
            match svc.log_sink() {
                Some(sink) => println!("{}", logging::describe(sink).await?),
                None => println!("No log file is set."),
            }
            Ok(())
        });

        registry
    }
}

//! Actix actor distributing post-publication signals to baking workers.

use actix::{
    Actor,
    AsyncContext,
    Context,
    Handler,
    Message,
    Recipient,
    Supervised,
    SystemService,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use std::time::Duration;

use crate::{
    config,
    db::{
        Pool,
        models as db,
        schema::modules,
        types::ModuleState,
    },
    models::Module,
};

/// Signal that a collection version entered the `post-publication` state
/// and wants baking.
///
/// Delivery is at least once: the notifier sweeps the store on an
/// interval and re-announces anything still unbaked, so work committed
/// by another process (the publication commands run outside the server)
/// is picked up too. Consumers claim work transactionally, so duplicate
/// signals are harmless.
#[derive(Clone, Debug)]
pub struct PostPublication {
    pub module_ident: i32,
    pub ident: String,
    pub timestamp: DateTime<Utc>,
}

impl Message for PostPublication {
    type Result = ();
}

/// Register a new listener for post-publication signals.
pub struct RegisterListener {
    pub addr: Recipient<PostPublication>,
}

impl Message for RegisterListener {
    type Result = ();
}

/// Actix actor which announces baking work to registered listeners.
pub struct Notifier {
    pool: Pool,
    interval: Duration,
    listeners: Vec<Recipient<PostPublication>>,
}

impl Notifier {
    fn dispatch(&mut self, message: PostPublication) {
        for listener in &self.listeners {
            let _ = listener.do_send(message.clone());
        }
    }

    fn on_interval(&mut self, _: &mut Context<Self>) {
        if let Err(err) = self.sweep() {
            error!("Error sweeping for unbaked collections: {}", err);
        }
    }

    /// Re-announce every collection still waiting to be baked.
    fn sweep(&mut self) -> Result<(), failure::Error> {
        let db = self.pool.get()?;

        let waiting = modules::table
            .filter(modules::state.eq(ModuleState::PostPublication))
            .get_results::<db::Module>(&*db)?;

        for module in waiting.into_iter().map(Module::from_db) {
            self.dispatch(PostPublication {
                module_ident: module.module_ident(),
                ident: module.ident().to_string(),
                timestamp: Utc::now(),
            });
        }

        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        let cfg = config::load().expect("Configuration is not loaded");

        Self {
            pool: crate::db::pool(cfg).expect("Database is not initialized"),
            interval: Duration::from_secs(cfg.baking.poll_interval),
            listeners: Vec::new(),
        }
    }
}

impl Actor for Notifier {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(self.interval, Self::on_interval);
    }
}

impl Supervised for Notifier {
}

impl SystemService for Notifier {
}

impl Handler<RegisterListener> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: RegisterListener, _: &mut Self::Context) {
        self.listeners.push(msg.addr);
    }
}

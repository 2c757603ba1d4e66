use actix::{Actor, Addr, Handler, SyncArbiter, SyncContext, SystemService};
use diesel::{
    Connection as _Connection,
    prelude::*,
    result::Error as DbError,
};
use failure::Error;

use crate::{
    config::{self, Config},
    db::{
        Connection,
        Pool,
        models as db,
        schema::{modules, post_publication_results},
        types::{ContentType, ModuleState, PublicationState},
    },
    events::{Notifier, PostPublication, RegisterListener},
    models::{Ident, Module, Tree},
    models::module::FindModuleError,
};

/// Strategy producing the collated tree of a collection version.
///
/// The default implementation composes the collated tree directly from
/// the raw one. Deployments with content-generating rulesets substitute
/// their own collator when starting the worker.
pub trait Collator {
    fn collate(&self, dbconn: &Connection, module: &Module, recipe: &str)
    -> Result<Tree, Error>;
}

/// Collator applying no transformation beyond composition.
pub struct RecipeCollator;

impl Collator for RecipeCollator {
    fn collate(&self, dbconn: &Connection, module: &Module, _recipe: &str)
    -> Result<Tree, Error> {
        Tree::load(dbconn, module.module_ident(), false)?
            .ok_or_else(|| failure::format_err!(
                "collection {} has no tree to collate", module.ident()))
    }
}

/// Claim one collection waiting to be baked, moving it to `processing`.
///
/// The candidate row is locked for the duration of the claim, so
/// concurrent workers never observe the same item. Returns `None` when
/// nothing is waiting.
pub fn claim_next(dbconn: &Connection) -> Result<Option<Module>, DbError> {
    dbconn.transaction(|| {
        let row = modules::table
            .filter(modules::state.eq(ModuleState::PostPublication))
            .order(modules::module_ident.asc())
            .for_update()
            .skip_locked()
            .first::<db::Module>(dbconn)
            .optional()?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let row = diesel::update(modules::table
            .filter(modules::module_ident.eq(row.module_ident)))
            .set(modules::state.eq(ModuleState::Processing))
            .get_result::<db::Module>(dbconn)?;

        Ok(Some(Module::from_db(row)))
    })
}

/// Bake a single claimed collection version.
///
/// Both outcomes are recorded in `post_publication_results`. Errors move
/// the version to the `errored` state instead of propagating, so one bad
/// collection cannot stall the queue.
pub fn bake(
    dbconn: &Connection,
    cfg: &Config,
    collator: &dyn Collator,
    module: &mut Module,
) {
    let ident = module.ident();

    match run_recipe(dbconn, collator, module, &cfg.baking.recipe) {
        Ok(()) => {
            info!("Baked {} with recipe {}", ident, cfg.baking.recipe);
            record_result(dbconn, module.module_ident(),
                PublicationState::Done, "Baking succeeded");
        }
        Err(err) => {
            error!("Could not bake {}: {}", ident, err);

            if let Err(err) = module.set_state(dbconn, ModuleState::Errored) {
                error!("Could not mark {} as errored: {}", ident, err);
            }

            record_result(dbconn, module.module_ident(),
                PublicationState::Failed, &err.to_string());
        }
    }
}

/// Replace the collated tree and stamp the module as baked, atomically.
fn run_recipe(
    dbconn: &Connection,
    collator: &dyn Collator,
    module: &mut Module,
    recipe: &str,
) -> Result<(), Error> {
    dbconn.transaction(|| {
        Tree::delete_collated(dbconn, module.module_ident())?;

        let collated = collator.collate(dbconn, module, recipe)?;
        collated.write(dbconn, true)?;

        module.mark_baked(dbconn, recipe)?;

        Ok(())
    })
}

fn record_result(
    dbconn: &Connection,
    module_ident: i32,
    state: PublicationState,
    message: &str,
) {
    let result = diesel::insert_into(post_publication_results::table)
        .values(&db::NewPostPublicationResult {
            module_ident,
            state,
            message,
        })
        .execute(dbconn);

    if let Err(err) = result {
        error!("Could not record baking result for module {}: {}",
            module_ident, err);
    }
}

/// Queue an already committed collection version for another bake.
///
/// The version is flipped back to `post-publication`, where the next
/// sweep or signal will pick it up.
pub fn request_rebake(dbconn: &Connection, ident: &Ident)
-> Result<Module, RebakeError> {
    if !ident.is_versioned() {
        return Err(RebakeError::Unversioned);
    }

    let mut module = Module::by_ident(dbconn, ident)
        .map_err(|err| match err {
            FindModuleError::Database(err) => RebakeError::Database(err),
            FindModuleError::NotFound => RebakeError::NotFound,
        })?;

    if module.kind() != ContentType::Binder {
        return Err(RebakeError::NotBinder);
    }

    module.set_state(dbconn, ModuleState::PostPublication)?;

    Ok(module)
}

#[derive(Debug, Fail)]
pub enum RebakeError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No module found matching given criteria.
    #[fail(display = "No such content")]
    NotFound,
    /// Only collections have collated trees.
    #[fail(display = "Only collections can be baked")]
    NotBinder,
    /// Rebaking needs an exact version to work on.
    #[fail(display = "An exact version is required")]
    Unversioned,
}

impl_from! { for RebakeError ;
    DbError => |e| RebakeError::Database(e),
}

/// Actix actor baking collection versions as they are announced.
pub struct BakeWorker {
    pool: Pool,
    collator: Box<dyn Collator + Send>,
}

impl BakeWorker {
    pub fn new(pool: Pool) -> BakeWorker {
        BakeWorker {
            pool,
            collator: Box::new(RecipeCollator),
        }
    }

    /// Start a worker on its own arbiter and subscribe it to
    /// post-publication signals.
    pub fn start(pool: Pool) -> Addr<BakeWorker> {
        let addr = SyncArbiter::start(1, move || BakeWorker::new(pool.clone()));

        Notifier::from_registry().do_send(RegisterListener {
            addr: addr.clone().recipient(),
        });

        addr
    }

    /// Claim and bake until the queue is empty.
    fn drain(&mut self) -> Result<(), Error> {
        let db = self.pool.get()?;
        let cfg = config::load()?;

        while let Some(mut module) = claim_next(&*db)? {
            bake(&*db, cfg, &*self.collator, &mut module);
        }

        Ok(())
    }
}

impl Actor for BakeWorker {
    type Context = SyncContext<Self>;

    /// Bake anything left over from before the last restart.
    fn started(&mut self, _: &mut Self::Context) {
        if let Err(err) = self.drain() {
            error!("Could not process stale collections: {}", err);
        }
    }
}

impl Handler<PostPublication> for BakeWorker {
    type Result = ();

    fn handle(&mut self, msg: PostPublication, _: &mut Self::Context) {
        debug!("Baking signal for {}", msg.ident);

        if let Err(err) = self.drain() {
            error!("Could not process baking queue: {}", err);
        }
    }
}

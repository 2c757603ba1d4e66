use diesel::{
    Connection as _Connection,
    prelude::*,
    result::Error as DbError,
};
use failure::Fail;
use serde_json::{Value, json};

use crate::db::{
    Connection,
    models as db,
    schema::{publications, users},
    types::PublicationState,
};
use crate::publish;
use super::{module::Module, pending::PendingDocument};

/// A batch of pending documents submitted together.
#[derive(Debug)]
pub struct Publication {
    data: db::Publication,
}

/// What a poke should do next, given everything it learned about a batch.
///
/// Computing this is separated from performing it so the transition rules
/// can be tested without a database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// The batch is already committing or settled.
    Leave(PublicationState),
    WaitForAcceptance,
    WaitForModeration,
    /// All gates passed; a pre-publication is done, anything else commits.
    Ready,
}

/// Whether a publisher counts as vetted.
///
/// Moderator approval qualifies, and so does a batch revising content
/// that already has published versions. Nothing else does: in particular
/// the publish permission intake grants on a fresh uuid must not count,
/// or a first publication would vet itself.
pub fn publisher_is_vetted(
    moderated: bool,
    revises_published_content: bool,
) -> bool {
    moderated || revises_published_content
}

/// Transition rules of the publication state machine.
pub fn next_step(
    state: Option<PublicationState>,
    all_accepted: bool,
    publisher_vetted: bool,
) -> Step {
    if let Some(state) = state {
        if state.is_settled() {
            return Step::Leave(state);
        }
    }

    if !all_accepted {
        Step::WaitForAcceptance
    } else if !publisher_vetted {
        Step::WaitForModeration
    } else {
        Step::Ready
    }
}

impl Publication {
    pub(crate) fn from_db(data: db::Publication) -> Publication {
        Publication { data }
    }

    pub fn by_id(dbconn: &Connection, id: i32)
    -> Result<Publication, FindPublicationError> {
        publications::table
            .filter(publications::id.eq(id))
            .get_result::<db::Publication>(dbconn)
            .optional()?
            .ok_or(FindPublicationError::NotFound)
            .map(Publication::from_db)
    }

    /// Insert a new publication row. It carries no explicit state until the
    /// first poke.
    pub fn create(
        dbconn: &Connection,
        publisher: &str,
        message: &str,
        epub: Option<&[u8]>,
        is_pre_publication: bool,
    ) -> Result<Publication, DbError> {
        diesel::insert_into(publications::table)
            .values(&db::NewPublication {
                publisher,
                publication_message: message,
                epub,
                is_pre_publication,
            })
            .get_result::<db::Publication>(dbconn)
            .map(Publication::from_db)
    }

    /// All publications currently awaiting a moderator's decision.
    pub fn all_waiting_moderation(dbconn: &Connection)
    -> Result<Vec<Publication>, DbError> {
        publications::table
            .filter(publications::state
                .eq(PublicationState::WaitingForModeration))
            .order(publications::id.asc())
            .get_results::<db::Publication>(dbconn)
            .map(|rows| rows.into_iter()
                .map(Publication::from_db)
                .collect())
    }

    pub fn id(&self) -> i32 {
        self.data.id
    }

    pub fn state(&self) -> PublicationState {
        self.data.state.unwrap_or(PublicationState::Pending)
    }

    pub fn state_messages(&self) -> &[Value] {
        self.data.state_messages
            .as_ref()
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Advance this publication as far as its gates allow.
    ///
    /// Safe to call repeatedly and concurrently: the decision is made under
    /// a row lock, and batches already committing or settled are left
    /// untouched.
    pub fn poke(&mut self, dbconn: &Connection)
    -> Result<PublicationState, PokeError> {
        let step = dbconn.transaction::<_, PokeError, _>(|| {
            // Re-read under lock; another poke may have advanced us.
            self.data = publications::table
                .filter(publications::id.eq(self.data.id))
                .for_update()
                .get_result::<db::Publication>(dbconn)?;

            if let Some(state) = self.data.state {
                if state.is_settled() {
                    return Ok(Step::Leave(state));
                }
            }

            let mut all_accepted = true;
            for mut pending in
                PendingDocument::of_publication(dbconn, self.data.id)?
            {
                if !pending.refresh_acceptance(dbconn)? {
                    all_accepted = false;
                }
            }

            let vetted = self.publisher_vetted(dbconn)?;
            let step = next_step(self.data.state, all_accepted, vetted);

            match step {
                Step::Leave(_) => (),
                Step::WaitForAcceptance => self.set_state(
                    dbconn, PublicationState::WaitingForAcceptance)?,
                Step::WaitForModeration => self.set_state(
                    dbconn, PublicationState::WaitingForModeration)?,
                Step::Ready => {
                    if self.data.is_pre_publication {
                        self.set_state(dbconn, PublicationState::Done)?;
                    } else {
                        // Recorded before any content write, so a crash
                        // mid-commit reads as Publishing, not Pending.
                        self.set_state(dbconn, PublicationState::Publishing)?;
                    }
                }
            }

            Ok(step)
        })?;

        if step == Step::Ready && !self.data.is_pre_publication {
            match publish::publish_pending(dbconn, self.data.id) {
                Ok(_) => self.set_state(dbconn, PublicationState::Done)?,
                Err(error) => {
                    error!(
                        "publication {} failed to commit: {}",
                        self.data.id, error,
                    );
                    sentry::capture_message(
                        &format!(
                            "publication {} failed to commit: {}",
                            self.data.id, error,
                        ),
                        sentry::Level::Error,
                    );

                    self.append_message(dbconn, json!({
                        "type": "CriticalError",
                        "message": "an unexpected error occurred \
                                    while committing",
                    }))?;
                    self.set_state(dbconn, PublicationState::Failed)?;
                }
            }
        }

        Ok(self.state())
    }

    /// Resolve a batch waiting for moderation.
    ///
    /// Accepting vets the publisher and re-pokes. Rejecting discards the
    /// batch content, but leaves the acceptance ledger and ACL entries of
    /// the touched uuids alone.
    pub fn moderate(&mut self, dbconn: &Connection, accept: bool)
    -> Result<PublicationState, ModerateError> {
        if self.state() != PublicationState::WaitingForModeration {
            return Err(ModerateError::NotWaiting(self.state()));
        }

        if accept {
            diesel::insert_into(users::table)
                .values((
                    users::username.eq(&self.data.publisher),
                    users::is_moderated.eq(true),
                ))
                .on_conflict(users::username)
                .do_update()
                .set(users::is_moderated.eq(true))
                .execute(dbconn)
                .map_err(ModerateError::Database)?;

            return self.poke(dbconn).map_err(ModerateError::Poke);
        }

        dbconn.transaction::<_, DbError, _>(|| {
            diesel::delete(crate::db::schema::pending_documents::table
                .filter(crate::db::schema::pending_documents::publication_id
                    .eq(self.data.id)))
                .execute(dbconn)?;

            self.data = diesel::update(publications::table
                .filter(publications::id.eq(self.data.id)))
                .set((
                    publications::state.eq(PublicationState::Rejected),
                    publications::epub.eq(None::<Vec<u8>>),
                ))
                .get_result::<db::Publication>(dbconn)?;

            Ok(())
        }).map_err(ModerateError::Database)?;

        Ok(self.state())
    }

    /// Append a structured record to this publication's state messages.
    pub fn append_message(&mut self, dbconn: &Connection, message: Value)
    -> Result<(), DbError> {
        let mut messages = self.data.state_messages
            .as_ref()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        messages.push(message);

        self.data = diesel::update(publications::table
            .filter(publications::id.eq(self.data.id)))
            .set(publications::state_messages.eq(Value::Array(messages)))
            .get_result::<db::Publication>(dbconn)?;

        Ok(())
    }

    /// Mark this publication successfully committed.
    pub fn succeed(&mut self, dbconn: &Connection) -> Result<(), DbError> {
        self.set_state(dbconn, PublicationState::Done)
    }

    /// Mark this publication failed. Used when validation errors make the
    /// batch unpublishable.
    pub fn fail(&mut self, dbconn: &Connection) -> Result<(), DbError> {
        self.set_state(dbconn, PublicationState::Failed)
    }

    fn set_state(&mut self, dbconn: &Connection, state: PublicationState)
    -> Result<(), DbError> {
        self.data = diesel::update(publications::table
            .filter(publications::id.eq(self.data.id)))
            .set(publications::state.eq(state))
            .get_result::<db::Publication>(dbconn)?;
        Ok(())
    }

    /// A publisher is vetted once a moderator marked them so, or when this
    /// batch revises content with previously published versions.
    ///
    /// ACL entries are deliberately not consulted: intake grants the
    /// submitter publish permission on every freshly minted uuid, so
    /// holding one is no evidence of history.
    fn publisher_vetted(&self, dbconn: &Connection) -> Result<bool, DbError> {
        let moderated = users::table
            .filter(users::username.eq(&self.data.publisher))
            .select(users::is_moderated)
            .get_result::<bool>(dbconn)
            .optional()?
            .unwrap_or(false);

        let mut revises = false;
        for pending in PendingDocument::of_publication(dbconn, self.data.id)? {
            if Module::any_version_exists(dbconn, pending.uuid)? {
                revises = true;
                break;
            }
        }

        Ok(publisher_is_vetted(moderated, revises))
    }

    pub fn into_db(self) -> db::Publication {
        self.data
    }
}

impl std::ops::Deref for Publication {
    type Target = db::Publication;

    fn deref(&self) -> &db::Publication {
        &self.data
    }
}

#[derive(Debug, Fail)]
pub enum FindPublicationError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No publication found matching given criteria.
    #[fail(display = "No such publication")]
    NotFound,
}

impl_from! { for FindPublicationError ;
    DbError => |e| FindPublicationError::Database(e),
}

#[derive(Debug, Fail)]
pub enum PokeError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// A pending document's stored state is unusable.
    #[fail(display = "{}", _0)]
    Pending(#[cause] super::pending::RefreshAcceptanceError),
}

impl_from! { for PokeError ;
    DbError => |e| PokeError::Database(e),
    super::pending::RefreshAcceptanceError => |e| PokeError::Pending(e),
}

#[derive(Debug, Fail)]
pub enum ModerateError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Publication is not waiting for moderation.
    #[fail(display = "Publication is in state {}, not waiting for moderation", _0)]
    NotWaiting(PublicationState),
    /// Re-poking after acceptance failed.
    #[fail(display = "{}", _0)]
    Poke(#[cause] PokeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states_are_left_alone() {
        for &state in &[
            PublicationState::Publishing,
            PublicationState::Rejected,
            PublicationState::Failed,
            PublicationState::Done,
        ] {
            assert_eq!(
                next_step(Some(state), true, true),
                Step::Leave(state),
                "poked {:?}", state,
            );
        }
    }

    #[test]
    fn missing_acceptance_waits() {
        assert_eq!(next_step(None, false, true), Step::WaitForAcceptance);
        assert_eq!(
            next_step(
                Some(PublicationState::WaitingForAcceptance), false, true),
            Step::WaitForAcceptance,
        );
    }

    #[test]
    fn acceptance_outranks_moderation() {
        assert_eq!(next_step(None, false, false), Step::WaitForAcceptance);
    }

    #[test]
    fn unvetted_publisher_waits_for_moderation() {
        assert_eq!(next_step(None, true, false), Step::WaitForModeration);
    }

    #[test]
    fn fully_gated_batch_is_ready() {
        assert_eq!(next_step(None, true, true), Step::Ready);
        assert_eq!(
            next_step(Some(PublicationState::WaitingForAcceptance), true, true),
            Step::Ready,
        );
        assert_eq!(
            next_step(
                Some(PublicationState::WaitingForModeration), true, true),
            Step::Ready,
        );
    }

    #[test]
    fn fresh_content_does_not_vet_its_publisher() {
        // A first batch of brand-new content: publisher not moderated, no
        // uuid in the batch has published versions. The permission entry
        // intake minted on the fresh uuid changes nothing.
        assert!(!publisher_is_vetted(false, false));
        assert_eq!(
            next_step(None, true, publisher_is_vetted(false, false)),
            Step::WaitForModeration,
        );

        assert!(publisher_is_vetted(true, false));
        assert!(publisher_is_vetted(false, true));
    }

    #[test]
    fn completed_acceptance_advances_a_waiting_batch() {
        use crate::models::acceptance::all_accepted;

        // Once every request has an explicit yes on record, the next poke
        // moves the batch past the acceptance gate.
        let complete = all_accepted(vec![Some(true), Some(true)]);
        assert!(complete);
        assert_eq!(
            next_step(
                Some(PublicationState::WaitingForAcceptance), complete, true),
            Step::Ready,
        );
    }

    #[test]
    fn repeat_poke_is_stable() {
        // Whatever a poke decides, deciding again from the resulting state
        // with unchanged inputs gives the same answer.
        let outcome = next_step(None, false, true);
        assert_eq!(outcome, Step::WaitForAcceptance);
        assert_eq!(
            next_step(
                Some(PublicationState::WaitingForAcceptance), false, true),
            outcome,
        );
    }
}

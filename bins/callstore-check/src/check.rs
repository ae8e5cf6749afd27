use std::sync::Arc;

use callstore_api::{CallState, Persona};
use callstore_engine::{Store, StoreError};

use crate::error::CheckError;

fn ensure(round: usize, ok: bool, detail: &str) -> Result<(), CheckError> {
    if ok {
        Ok(())
    } else {
        Err(CheckError::Mismatch {
            round,
            detail: detail.to_string(),
        })
    }
}

/// One create, read, search, update cycle on a fresh call.
async fn round(store: &Store<CallState>, round: usize) -> Result<(), CheckError> {
    let phone = format!("+1555{:07}", round);
    let call = CallState::new(phone.clone());
    let id = call.call_id.clone();

    ensure(round, store.get(&id).await?.is_none(), "call exists before create")?;
    store.create(&call).await?;
    ensure(round, store.get(&id).await?.as_ref() == Some(&call), "point read differs")?;

    let newest = store.search_one(&phone).await?;
    ensure(
        round,
        newest.is_some_and(|c| c.call_id == id),
        "search_one missed the new call",
    )?;

    let voice = uuid::Uuid::new_v4().to_string();
    store
        .transaction::<_, StoreError>(&id, |c| {
            c.voice_id = Some(voice.clone());
            c.push_message(Persona::Assistant, "check");
            Ok(())
        })
        .await?;
    store
        .transaction::<_, StoreError>(&id, |c| {
            c.in_progress = true;
            Ok(())
        })
        .await?;

    let stored = store.get(&id).await?;
    ensure(
        round,
        stored.is_some_and(|c| c.in_progress && c.voice_id.as_deref() == Some(voice.as_str()) && c.messages.len() == 1),
        "transactions did not both land",
    )?;

    store.delete(&id).await?;
    ensure(round, store.get(&id).await?.is_none(), "call survived delete")?;
    tracing::debug!(round, id = %id, "round passed");
    Ok(())
}

/// Run `rounds` cycles concurrently and report the first failure.
pub async fn run(store: Arc<Store<CallState>>, rounds: usize) -> Result<(), CheckError> {
    let mut tasks = Vec::with_capacity(rounds);
    for n in 0..rounds {
        let store = store.clone();
        tasks.push((n, tokio::spawn(async move { round(&store, n).await })));
    }

    let mut first_error = None;
    for (n, task) in tasks {
        let outcome = match task.await {
            Ok(r) => r,
            Err(_) => Err(CheckError::Panicked(n)),
        };
        if let Err(e) = outcome {
            tracing::error!(round = n, error = %e, "round failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

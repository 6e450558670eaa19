use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use errand_client::{ClientContext, LoginResult, LoginWithCustomIdRequest};
use errand_config::DeliveryMode;
use errand_engine::{AsyncBlock, OpError};
use errand_queue::TaskQueue;
use serde_json::Value;
use tokio::{task, time};

use crate::args::{Command, USAGE};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run one command to completion and render its output.
pub async fn run(client: &ClientContext, queue: &TaskQueue, command: &Command) -> Result<String> {
    match command {
        Command::Login {
            custom_id,
            create_account,
        } => {
            let login = login(client, queue, custom_id, *create_account).await?;
            Ok(format!(
                "player {} (newly created: {})",
                login.player_id, login.newly_created
            ))
        }
        Command::Call {
            path,
            body,
            login_as,
        } => {
            let block = AsyncBlock::new(queue);
            match login_as {
                Some(custom_id) => {
                    let login = login(client, queue, custom_id, false).await?;
                    client
                        .user(&login)
                        .call_serialized(&block, path, body.clone())?;
                }
                None => client.call_serialized(&block, path, body.clone())?,
            }
            wait(client, &block)
                .await
                .with_context(|| format!("call to {path} failed"))?;

            let mut buffer = vec![0; block.get_result_size()?];
            block.get_result(&mut buffer)?;
            let data: Value = serde_json::from_slice(&buffer)?;
            Ok(serde_json::to_string_pretty(&data)?)
        }
        Command::Help => Ok(USAGE.to_string()),
    }
}

async fn login(
    client: &ClientContext,
    queue: &TaskQueue,
    custom_id: &str,
    create_account: bool,
) -> Result<Arc<LoginResult>> {
    let block = AsyncBlock::new(queue);
    let request = LoginWithCustomIdRequest::new(custom_id).create_account(create_account);
    client.login_with_custom_id(&block, &request)?;
    wait(client, &block).await.context("login failed")?;

    let login = block
        .get_result_handle()?
        .downcast::<LoginResult>()
        .context("login produced an unexpected result")?;
    tracing::info!(player_id = %login.player_id, "Logged in");
    Ok(login)
}

/// Wait for `block` the way the transport's delivery mode expects.
async fn wait(client: &ClientContext, block: &AsyncBlock) -> Result<(), OpError> {
    match client.transport().delivery() {
        DeliveryMode::Threaded => task::block_in_place(|| block.get_status(true)),
        DeliveryMode::Polled => loop {
            client.transport().update()?;
            match block.get_status(false) {
                Err(OpError::Pending) => time::sleep(POLL_INTERVAL).await,
                status => return status,
            }
        },
    }
}

/// Close the client context and drain the queue.
pub async fn shutdown(client: ClientContext, queue: &TaskQueue) {
    let block = AsyncBlock::new(queue);
    let closed = match client.cleanup_async(&block) {
        Ok(()) => wait(&client, &block).await,
        Err(e) => Err(e),
    };
    if let Err(e) = closed {
        tracing::warn!(error = %e, "Client context cleanup failed");
    }

    if let Err(e) = task::block_in_place(|| queue.terminate(true, None)) {
        tracing::warn!(error = %e, "Task queue termination failed");
    }
}

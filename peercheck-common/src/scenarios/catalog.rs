//! The five scenario scripts.
//!
//! Port offsets keep each scenario on its own ports: server `+0..+4`,
//! clients `+1..+6`.

use super::ScenarioContext;
use crate::harness::HarnessResult;
use crate::types::PEER_FILE;

/// Restarting a server in the same workspace keeps its identifier.
pub(super) async fn stable_server_id(ctx: &mut ScenarioContext<'_>) -> HarnessResult<()> {
    let port = ctx.ports().server(0);

    let Some(first) = ctx.spawn_server("server", port).await? else {
        return Ok(());
    };
    ctx.settle().await;
    ctx.stop(&first).await?;
    ctx.settle().await;

    let Some(second) = ctx.spawn_server("server", port).await? else {
        return Ok(());
    };
    ctx.check(
        "server identifier stable across restart",
        first.node_id() == second.node_id(),
        &[
            ("first", first.node_id().as_str()),
            ("second", second.node_id().as_str()),
        ],
    );
    ctx.stop(&second).await
}

/// Two client runs against one server report different identifiers.
pub(super) async fn ephemeral_client_id(ctx: &mut ScenarioContext<'_>) -> HarnessResult<()> {
    let ports = ctx.ports();

    let Some(server) = ctx.spawn_server("server", ports.server(1)).await? else {
        return Ok(());
    };
    ctx.settle().await;

    let Some(client1) = ctx
        .spawn_client("client1", ports.client(1), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.settle().await;
    ctx.stop(&client1).await?;
    ctx.settle().await;

    let Some(client2) = ctx
        .spawn_client("client2", ports.client(2), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.check(
        "client identifier differs between runs",
        client1.node_id() != client2.node_id(),
        &[
            ("first", client1.node_id().as_str()),
            ("second", client2.node_id().as_str()),
        ],
    );
    ctx.stop(&client2).await?;
    ctx.stop(&server).await
}

/// A server that accepted a client has no peer file.
pub(super) async fn server_no_peer_persistence(
    ctx: &mut ScenarioContext<'_>,
) -> HarnessResult<()> {
    let ports = ctx.ports();

    let Some(server) = ctx.spawn_server("server", ports.server(2)).await? else {
        return Ok(());
    };
    ctx.settle().await;

    let Some(client) = ctx
        .spawn_client("client", ports.client(3), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.settle_before_probe().await;

    let present = ctx.probe(&server, PEER_FILE);
    ctx.check(
        "server has no .tunnel_peer",
        !present,
        &[("server", if present { "present" } else { "absent" })],
    );
    ctx.stop(&client).await?;
    ctx.stop(&server).await
}

/// A connected client has a peer file.
pub(super) async fn client_peer_persistence(ctx: &mut ScenarioContext<'_>) -> HarnessResult<()> {
    let ports = ctx.ports();

    let Some(server) = ctx.spawn_server("server", ports.server(3)).await? else {
        return Ok(());
    };
    ctx.settle().await;

    let Some(client) = ctx
        .spawn_client("client", ports.client(4), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.settle_before_probe().await;

    let present = ctx.probe(&client, PEER_FILE);
    ctx.check(
        "client has .tunnel_peer",
        present,
        &[("client", if present { "present" } else { "absent" })],
    );
    ctx.stop(&client).await?;
    ctx.stop(&server).await
}

/// A server accepts a second client after the first disconnects.
pub(super) async fn multiple_clients(ctx: &mut ScenarioContext<'_>) -> HarnessResult<()> {
    let ports = ctx.ports();

    let Some(server) = ctx.spawn_server("server", ports.server(4)).await? else {
        return Ok(());
    };
    ctx.settle().await;

    let Some(client1) = ctx
        .spawn_client("client1", ports.client(5), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.settle().await;
    ctx.stop(&client1).await?;
    ctx.settle().await;

    let Some(client2) = ctx
        .spawn_client("client2", ports.client(6), server.node_id())
        .await?
    else {
        return ctx.stop(&server).await;
    };
    ctx.check(
        "distinct second client connected after first left",
        client1.node_id() != client2.node_id(),
        &[
            ("client1", client1.node_id().short()),
            ("client2", client2.node_id().short()),
        ],
    );
    ctx.stop(&client2).await?;
    ctx.stop(&server).await
}

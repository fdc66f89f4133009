// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the streamhub server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "streamhub", about = "WebSocket stream fan-out hub")]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "STREAMHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "STREAMHUB_PORT")]
    pub port: u16,

    /// Base64-encoded PEM public key for verifying bearer tokens.
    /// If unset, the `JwtUID`/`JwtRole` request headers are trusted as-is.
    #[arg(long, env = "JWT_PUBLIC_KEY")]
    pub jwt_public_key: Option<String>,

    /// Roles allowed to subscribe to `system.`-prefixed streams.
    #[arg(
        long,
        env = "RBAC_SYSTEM",
        default_value = "admin,superadmin,operator",
        value_delimiter = ','
    )]
    pub rbac_system: Vec<String>,

    /// Roles allowed to subscribe to other prefixed streams.
    #[arg(long, env = "RBAC_ADMIN", default_value = "admin,superadmin", value_delimiter = ',')]
    pub rbac_admin: Vec<String>,

    /// NATS URL of the upstream event log. If unset, no records are consumed.
    #[arg(long, env = "STREAMHUB_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Subject prefix for upstream records; the remainder of the subject is
    /// the record key (`scope.stream.type`).
    #[arg(long, default_value = "events", env = "STREAMHUB_UPSTREAM_PREFIX")]
    pub upstream_prefix: String,

    /// Number of writer threads draining the outbound queue.
    #[arg(long, default_value_t = crate::outbound::DEFAULT_WRITERS, env = "STREAMHUB_WRITERS")]
    pub writers: usize,
}

impl HubConfig {
    pub fn listen_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

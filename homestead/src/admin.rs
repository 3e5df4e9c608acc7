//! Administrative database operations
//!
//! Idempotent role and database management executed through psql inside
//! the running postgres pod. Identifiers are validated and values quoted
//! by [`crate::sql`] before anything reaches the cluster.

use std::time::Duration;

use tracing::{info, warn};

use homestead_common::{Error, Result};

use crate::kubernetes::exec;
use crate::kubernetes::K8sClient;
use crate::modules::Context;
use crate::sql;

/// How the administrative operations reach the database
pub struct AdminConn {
    /// Label selector resolving the postgres pod
    pub selector: String,
    /// Admin role psql connects as
    pub admin_user: String,
}

const READY_ATTEMPTS: u32 = 30;
const READY_INTERVAL: Duration = Duration::from_secs(1);

fn psql_command(admin_user: &str, database: Option<&str>, stmt: &str) -> Vec<String> {
    let mut command = vec![
        "psql".to_string(),
        "-U".to_string(),
        admin_user.to_string(),
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
    ];
    if let Some(db) = database {
        command.push("-d".to_string());
        command.push(db.to_string());
    }
    command.push("-tAc".to_string());
    command.push(stmt.to_string());
    command
}

/// Run one SQL statement through psql, failing on nonzero exit.
async fn run_sql(
    client: &K8sClient,
    pod: &str,
    conn: &AdminConn,
    database: Option<&str>,
    stmt: &str,
) -> Result<String> {
    let command = psql_command(&conn.admin_user, database, stmt);
    let output = exec::exec_capture(client, pod, &command).await?;

    if !output.success() {
        if !output.stderr.trim().is_empty() {
            warn!(pod, "psql stderr: {}", output.stderr.trim());
        }
        return Err(Error::process(command.join(" "), output.exit_code));
    }

    Ok(output.stdout)
}

/// Wait until postgres accepts connections, polling once per second.
async fn wait_ready(client: &K8sClient, pod: &str, conn: &AdminConn) -> Result<()> {
    let probe = vec![
        "pg_isready".to_string(),
        "-U".to_string(),
        conn.admin_user.clone(),
    ];

    for attempt in 1..=READY_ATTEMPTS {
        match exec::exec_capture(client, pod, &probe).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(_) | Err(_) => {
                if attempt < READY_ATTEMPTS {
                    tokio::time::sleep(READY_INTERVAL).await;
                }
            }
        }
    }

    Err(Error::transport(format!(
        "postgres in pod {pod} did not become ready within {READY_ATTEMPTS} seconds"
    )))
}

/// The fixed privilege set granted to a database's owning user. Grant
/// failures are warnings: re-runs can hit conditions some backends reject.
fn grant_statements(name: &str, user: &str) -> Vec<(Option<String>, String)> {
    vec![
        (None, format!("GRANT CONNECT ON DATABASE {name} TO {user}")),
        (
            Some(name.to_string()),
            format!("GRANT USAGE ON SCHEMA public TO {user}"),
        ),
        (
            Some(name.to_string()),
            format!("GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO {user}"),
        ),
        (
            Some(name.to_string()),
            format!("GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public TO {user}"),
        ),
        (
            Some(name.to_string()),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL ON TABLES TO {user}"),
        ),
        (
            Some(name.to_string()),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL ON SEQUENCES TO {user}"),
        ),
        (
            Some(name.to_string()),
            format!("ALTER SCHEMA public OWNER TO {user}"),
        ),
    ]
}

/// Ordered removal statements. The database drop always precedes the role
/// drop, and each is fatal, so a partial removal surfaces as a failure.
fn remove_statements(name: &str, user: &str) -> Vec<String> {
    vec![format!("DROP DATABASE {name}"), format!("DROP ROLE {user}")]
}

/// Create a database and its owning role, idempotently.
pub async fn add_db(
    ctx: &Context,
    conn: &AdminConn,
    name: &str,
    user: &str,
    password: &str,
) -> Result<()> {
    sql::validate_ident("database name", name)?;
    sql::validate_ident("user name", user)?;
    let password_literal = sql::quote_literal(password);

    let client = ctx.client().await?;
    let pod = exec::resolve_pod(&client, &conn.selector).await?;
    wait_ready(&client, &pod, conn).await?;

    // Role upsert: create with login on first run, rotate the password on
    // re-runs.
    let role_probe = format!(
        "SELECT 1 FROM pg_roles WHERE rolname = {}",
        sql::quote_literal(user)
    );
    if run_sql(&client, &pod, conn, None, &role_probe).await?.trim().is_empty() {
        run_sql(
            &client,
            &pod,
            conn,
            None,
            &format!("CREATE ROLE {user} WITH LOGIN PASSWORD {password_literal}"),
        )
        .await?;
        info!(user, "role created");
    } else {
        run_sql(
            &client,
            &pod,
            conn,
            None,
            &format!("ALTER ROLE {user} WITH PASSWORD {password_literal}"),
        )
        .await?;
        info!(user, "role password updated");
    }

    let db_probe = format!(
        "SELECT 1 FROM pg_database WHERE datname = {}",
        sql::quote_literal(name)
    );
    if run_sql(&client, &pod, conn, None, &db_probe).await?.trim().is_empty() {
        run_sql(
            &client,
            &pod,
            conn,
            None,
            &format!("CREATE DATABASE {name} OWNER {user}"),
        )
        .await?;
        info!(database = name, "database created");
    } else {
        info!(database = name, "database already present");
    }

    for (database, stmt) in grant_statements(name, user) {
        if let Err(e) = run_sql(&client, &pod, conn, database.as_deref(), &stmt).await {
            warn!(error = %e, statement = %stmt, "grant failed, continuing");
        }
    }

    Ok(())
}

/// Drop a database and its owning role. Both drops are fatal on failure.
pub async fn remove_db(ctx: &Context, conn: &AdminConn, name: &str, user: &str) -> Result<()> {
    sql::validate_ident("database name", name)?;
    sql::validate_ident("user name", user)?;

    let client = ctx.client().await?;
    let pod = exec::resolve_pod(&client, &conn.selector).await?;

    // Best effort: the database may already be idle
    let terminate = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = {} AND pid <> pg_backend_pid()",
        sql::quote_literal(name)
    );
    if let Err(e) = run_sql(&client, &pod, conn, None, &terminate).await {
        warn!(error = %e, "terminating active connections failed, continuing");
    }

    for stmt in remove_statements(name, user) {
        run_sql(&client, &pod, conn, None, &stmt).await?;
        info!(statement = %stmt, "executed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn conn() -> AdminConn {
        AdminConn {
            selector: "app.kubernetes.io/name=postgres".to_string(),
            admin_user: "postgres".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_db_rejects_invalid_name_before_any_remote_call() {
        let ctx = Context::new(AppConfig::default());
        let err = add_db(&ctx, &conn(), "my db", "user", "pass").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("my db"));
    }

    #[tokio::test]
    async fn test_remove_db_rejects_invalid_user_before_any_remote_call() {
        let ctx = Context::new(AppConfig::default());
        let err = remove_db(&ctx, &conn(), "mydb", "user;--").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_database_drop_precedes_role_drop() {
        let statements = remove_statements("myapp", "myuser");
        assert_eq!(statements[0], "DROP DATABASE myapp");
        assert_eq!(statements[1], "DROP ROLE myuser");
    }

    #[test]
    fn test_psql_command_targets_database() {
        let command = psql_command("postgres", Some("myapp"), "SELECT 1");
        assert_eq!(command[0], "psql");
        assert!(command.windows(2).any(|w| w[0] == "-d" && w[1] == "myapp"));
        assert_eq!(command.last().unwrap(), "SELECT 1");
        // Statements fail fast instead of continuing past errors
        assert!(command.contains(&"ON_ERROR_STOP=1".to_string()));
    }

    #[test]
    fn test_grants_cover_tables_sequences_and_ownership() {
        let grants = grant_statements("myapp", "myuser");
        assert_eq!(grants[0].0, None);
        assert!(grants[0].1.contains("GRANT CONNECT ON DATABASE myapp"));
        assert!(grants
            .iter()
            .any(|(_, s)| s.contains("ALL SEQUENCES IN SCHEMA public")));
        assert!(grants
            .iter()
            .any(|(_, s)| s.contains("ALTER SCHEMA public OWNER TO myuser")));
        // Grants beyond the first run inside the new database
        assert!(grants[1..].iter().all(|(db, _)| db.as_deref() == Some("myapp")));
    }
}

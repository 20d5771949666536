use crate::{ResourceStore, StoreError, StoreResult};
use async_trait::async_trait;
use nimbus_common::{
    FixedIp, FloatingIp, Instance, InstanceUpdate, KeyPair, Network, NewInstance, NewVolume,
    QuotaOverride, Volume, VolumeUpdate,
};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

const INSTANCE_COLUMNS: &str = "id, ec2_id, tenant_id, user_id, reservation_id, launch_index, \
     state, state_description, host, image_id, kernel_id, ramdisk_id, instance_type, memory_mb, \
     vcpus, local_gb, key_name, key_data, user_data, security_group, mac_address, hostname, \
     display_name, display_description, created_at, terminated_at";

const VOLUME_COLUMNS: &str = "id, ec2_id, tenant_id, user_id, size, availability_zone, status, \
     attach_status, instance_id, mountpoint, attach_time, host, display_name, \
     display_description, created_at, terminated_at";

/// Schema for the controller-owned tables. Safe to re-run.
pub async fn run_inline_migrations(pool: &Pool<Postgres>) -> StoreResult<()> {
    tracing::info!("running inline schema migrations");

    let schema_sql = r#"
        DO $$ BEGIN
            CREATE TYPE volume_status AS ENUM ('creating', 'available', 'in-use', 'deleting', 'error');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$;
        DO $$ BEGIN
            CREATE TYPE attach_status AS ENUM ('attached', 'detached');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$;
        CREATE TABLE IF NOT EXISTS instances (
            id UUID PRIMARY KEY,
            ec2_id VARCHAR(32) UNIQUE NOT NULL,
            tenant_id VARCHAR(255) NOT NULL,
            user_id VARCHAR(255) NOT NULL,
            reservation_id VARCHAR(32) NOT NULL,
            launch_index INTEGER NOT NULL,
            state INTEGER NOT NULL DEFAULT 0,
            state_description VARCHAR(255) NOT NULL,
            host VARCHAR(255),
            image_id VARCHAR(255) NOT NULL,
            kernel_id VARCHAR(255) NOT NULL,
            ramdisk_id VARCHAR(255) NOT NULL,
            instance_type VARCHAR(64) NOT NULL,
            memory_mb INTEGER NOT NULL,
            vcpus INTEGER NOT NULL,
            local_gb INTEGER NOT NULL,
            key_name VARCHAR(255),
            key_data TEXT,
            user_data TEXT NOT NULL DEFAULT '',
            security_group VARCHAR(255) NOT NULL,
            mac_address VARCHAR(17),
            hostname VARCHAR(255),
            display_name VARCHAR(255),
            display_description TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            terminated_at TIMESTAMPTZ,
            UNIQUE (reservation_id, launch_index)
        );
        CREATE INDEX IF NOT EXISTS instances_tenant_idx ON instances (tenant_id);
        CREATE TABLE IF NOT EXISTS volumes (
            id UUID PRIMARY KEY,
            ec2_id VARCHAR(32) UNIQUE NOT NULL,
            tenant_id VARCHAR(255) NOT NULL,
            user_id VARCHAR(255) NOT NULL,
            size INTEGER NOT NULL,
            availability_zone VARCHAR(255) NOT NULL,
            status volume_status NOT NULL DEFAULT 'creating',
            attach_status attach_status NOT NULL DEFAULT 'detached',
            instance_id UUID,
            mountpoint VARCHAR(255),
            attach_time TIMESTAMPTZ,
            host VARCHAR(255),
            display_name VARCHAR(255),
            display_description TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            terminated_at TIMESTAMPTZ
        );
        CREATE TABLE IF NOT EXISTS networks (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255) UNIQUE NOT NULL,
            cidr VARCHAR(64) NOT NULL,
            host VARCHAR(255),
            vpn_private_address VARCHAR(64)
        );
        CREATE TABLE IF NOT EXISTS fixed_ips (
            address VARCHAR(64) PRIMARY KEY,
            network_id UUID NOT NULL REFERENCES networks(id),
            instance_id UUID,
            allocated BOOLEAN NOT NULL DEFAULT FALSE
        );
        CREATE TABLE IF NOT EXISTS floating_ips (
            address VARCHAR(64) PRIMARY KEY,
            tenant_id VARCHAR(255),
            fixed_address VARCHAR(64) REFERENCES fixed_ips(address),
            host VARCHAR(255)
        );
        CREATE TABLE IF NOT EXISTS key_pairs (
            user_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            public_key TEXT NOT NULL,
            fingerprint VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (user_id, name)
        );
        CREATE TABLE IF NOT EXISTS quotas (
            tenant_id VARCHAR(255) PRIMARY KEY,
            instances BIGINT,
            cores BIGINT,
            volumes BIGINT,
            gigabytes BIGINT,
            floating_ips BIGINT
        )
    "#;

    for statement in split_statements(schema_sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

/// Split on `;` at line ends, keeping `DO $$ ... $$;` blocks whole.
fn split_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        current.push_str(trimmed);
        current.push('\n');
        let in_do_block = current.trim_start().starts_with("DO $$");
        let closes = if in_do_block {
            trimmed.ends_with("END $$;")
        } else {
            trimmed.ends_with(';')
        };
        if closes {
            out.push(current.trim().trim_end_matches(';').to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

pub struct PgStore {
    db: Pool<Postgres>,
}

impl PgStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.db
    }
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn instance_create(&self, new: NewInstance) -> StoreResult<Instance> {
        let sql = format!(
            "INSERT INTO instances
             (id, ec2_id, tenant_id, user_id, reservation_id, launch_index, state, state_description,
              image_id, kernel_id, ramdisk_id, instance_type, memory_mb, vcpus, local_gb,
              key_name, key_data, user_data, security_group, mac_address, hostname,
              display_name, display_description, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18, $19, $2, $20, $21, NOW())
             RETURNING {}",
            INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, Instance>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.ec2_id)
            .bind(&new.tenant_id)
            .bind(&new.user_id)
            .bind(&new.reservation_id)
            .bind(new.launch_index)
            .bind(&new.state_description)
            .bind(&new.image_id)
            .bind(&new.kernel_id)
            .bind(&new.ramdisk_id)
            .bind(&new.instance_type)
            .bind(new.memory_mb)
            .bind(new.vcpus)
            .bind(new.local_gb)
            .bind(&new.key_name)
            .bind(&new.key_data)
            .bind(&new.user_data)
            .bind(&new.security_group)
            .bind(&new.mac_address)
            .bind(&new.display_name)
            .bind(&new.display_description)
            .fetch_one(&self.db)
            .await?;
        Ok(instance)
    }

    async fn instance_get(&self, id: Uuid) -> StoreResult<Instance> {
        let sql = format!("SELECT {} FROM instances WHERE id = $1", INSTANCE_COLUMNS);
        sqlx::query_as::<_, Instance>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("instance", id))
    }

    async fn instance_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Instance> {
        let sql = format!("SELECT {} FROM instances WHERE ec2_id = $1", INSTANCE_COLUMNS);
        sqlx::query_as::<_, Instance>(&sql)
            .bind(ec2_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("instance", ec2_id))
    }

    async fn instance_get_all(&self) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            "SELECT {} FROM instances ORDER BY created_at, reservation_id, launch_index",
            INSTANCE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Instance>(&sql).fetch_all(&self.db).await?)
    }

    async fn instance_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            "SELECT {} FROM instances WHERE tenant_id = $1
             ORDER BY created_at, reservation_id, launch_index",
            INSTANCE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Instance>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.db)
            .await?)
    }

    async fn instance_get_all_by_reservation(
        &self,
        reservation_id: &str,
    ) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            "SELECT {} FROM instances WHERE reservation_id = $1 ORDER BY launch_index",
            INSTANCE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Instance>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.db)
            .await?)
    }

    async fn instance_update(&self, id: Uuid, update: InstanceUpdate) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE instances SET
                display_name = COALESCE($2, display_name),
                display_description = COALESCE($3, display_description),
                terminated_at = COALESCE($4, terminated_at)
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.display_name)
        .bind(update.display_description)
        .bind(update.terminated_at)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("instance", id));
        }
        Ok(())
    }

    async fn instance_destroy(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("instance", id));
        }
        Ok(())
    }

    async fn instance_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*)::bigint, COALESCE(SUM(vcpus), 0)::bigint
             FROM instances WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn instance_get_fixed_address(&self, id: Uuid) -> StoreResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT address FROM fixed_ips WHERE instance_id = $1 LIMIT 1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn instance_get_floating_address(&self, id: Uuid) -> StoreResult<Option<String>> {
        Ok(sqlx::query_scalar(
            "SELECT fl.address
             FROM floating_ips fl
             JOIN fixed_ips fx ON fx.address = fl.fixed_address
             WHERE fx.instance_id = $1
             LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn volume_create(&self, new: NewVolume) -> StoreResult<Volume> {
        let sql = format!(
            "INSERT INTO volumes
             (id, ec2_id, tenant_id, user_id, size, availability_zone, status, attach_status,
              display_name, display_description, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'creating', 'detached', $7, $8, NOW())
             RETURNING {}",
            VOLUME_COLUMNS
        );
        Ok(sqlx::query_as::<_, Volume>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.ec2_id)
            .bind(&new.tenant_id)
            .bind(&new.user_id)
            .bind(new.size)
            .bind(&new.availability_zone)
            .bind(&new.display_name)
            .bind(&new.display_description)
            .fetch_one(&self.db)
            .await?)
    }

    async fn volume_get(&self, id: Uuid) -> StoreResult<Volume> {
        let sql = format!("SELECT {} FROM volumes WHERE id = $1", VOLUME_COLUMNS);
        sqlx::query_as::<_, Volume>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("volume", id))
    }

    async fn volume_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Volume> {
        let sql = format!("SELECT {} FROM volumes WHERE ec2_id = $1", VOLUME_COLUMNS);
        sqlx::query_as::<_, Volume>(&sql)
            .bind(ec2_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("volume", ec2_id))
    }

    async fn volume_get_all(&self) -> StoreResult<Vec<Volume>> {
        let sql = format!("SELECT {} FROM volumes ORDER BY created_at", VOLUME_COLUMNS);
        Ok(sqlx::query_as::<_, Volume>(&sql).fetch_all(&self.db).await?)
    }

    async fn volume_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Volume>> {
        let sql = format!(
            "SELECT {} FROM volumes WHERE tenant_id = $1 ORDER BY created_at",
            VOLUME_COLUMNS
        );
        Ok(sqlx::query_as::<_, Volume>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.db)
            .await?)
    }

    async fn volume_update(&self, id: Uuid, update: VolumeUpdate) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE volumes SET
                display_name = COALESCE($2, display_name),
                display_description = COALESCE($3, display_description),
                terminated_at = COALESCE($4, terminated_at)
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.display_name)
        .bind(update.display_description)
        .bind(update.terminated_at)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("volume", id));
        }
        Ok(())
    }

    async fn volume_detached(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE volumes
             SET status = 'available',
                 attach_status = 'detached',
                 instance_id = NULL,
                 mountpoint = NULL,
                 attach_time = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("volume", id));
        }
        Ok(())
    }

    async fn volume_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*)::bigint, COALESCE(SUM(size), 0)::bigint
             FROM volumes WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn fixed_ip_associate(&self, address: &str, instance_id: Uuid) -> StoreResult<FixedIp> {
        let row = sqlx::query_as::<_, FixedIp>(
            "UPDATE fixed_ips SET instance_id = $2
             WHERE address = $1 AND (instance_id IS NULL OR instance_id = $2)
             RETURNING address, network_id, instance_id, allocated",
        )
        .bind(address)
        .bind(instance_id)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(fixed) => Ok(fixed),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM fixed_ips WHERE address = $1)")
                        .bind(address)
                        .fetch_one(&self.db)
                        .await?;
                if exists {
                    Err(StoreError::Duplicate {
                        kind: "fixed_ip",
                        id: address.to_string(),
                    })
                } else {
                    Err(StoreError::not_found("fixed_ip", address))
                }
            }
        }
    }

    async fn fixed_ip_associate_pool(
        &self,
        network_id: Uuid,
        instance_id: Uuid,
    ) -> StoreResult<FixedIp> {
        // SKIP LOCKED so concurrent provisioning requests never pick the same row.
        let row = sqlx::query_as::<_, FixedIp>(
            "WITH cte AS (
                SELECT fx.address
                FROM fixed_ips fx
                JOIN networks n ON n.id = fx.network_id
                WHERE fx.network_id = $1
                  AND fx.instance_id IS NULL
                  AND fx.allocated = FALSE
                  AND fx.address IS DISTINCT FROM n.vpn_private_address
                ORDER BY fx.address
                LIMIT 1
                FOR UPDATE OF fx SKIP LOCKED
             )
             UPDATE fixed_ips SET instance_id = $2
             FROM cte WHERE fixed_ips.address = cte.address
             RETURNING fixed_ips.address, fixed_ips.network_id, fixed_ips.instance_id, fixed_ips.allocated",
        )
        .bind(network_id)
        .bind(instance_id)
        .fetch_optional(&self.db)
        .await?;
        row.ok_or(StoreError::NoMoreAddresses(network_id))
    }

    async fn fixed_ip_set_allocated(&self, address: &str, allocated: bool) -> StoreResult<()> {
        let res = sqlx::query("UPDATE fixed_ips SET allocated = $2 WHERE address = $1")
            .bind(address)
            .bind(allocated)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("fixed_ip", address));
        }
        Ok(())
    }

    async fn fixed_ip_disassociate(&self, address: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE fixed_ips SET instance_id = NULL WHERE address = $1")
            .bind(address)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("fixed_ip", address));
        }
        Ok(())
    }

    async fn fixed_ip_get_instance(&self, address: &str) -> StoreResult<Option<Instance>> {
        let bound: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT instance_id FROM fixed_ips WHERE address = $1")
                .bind(address)
                .fetch_optional(&self.db)
                .await?;
        let Some(bound) = bound else {
            return Err(StoreError::not_found("fixed_ip", address));
        };
        let Some(instance_id) = bound else {
            return Ok(None);
        };
        match self.instance_get(instance_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn floating_ip_get_by_address(&self, address: &str) -> StoreResult<FloatingIp> {
        sqlx::query_as::<_, FloatingIp>(
            "SELECT address, tenant_id, fixed_address, host FROM floating_ips WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| StoreError::not_found("floating_ip", address))
    }

    async fn floating_ip_get_all(&self) -> StoreResult<Vec<FloatingIp>> {
        Ok(sqlx::query_as::<_, FloatingIp>(
            "SELECT address, tenant_id, fixed_address, host FROM floating_ips ORDER BY address",
        )
        .fetch_all(&self.db)
        .await?)
    }

    async fn floating_ip_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<FloatingIp>> {
        Ok(sqlx::query_as::<_, FloatingIp>(
            "SELECT address, tenant_id, fixed_address, host FROM floating_ips
             WHERE tenant_id = $1 ORDER BY address",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn floating_ip_count_by_tenant(&self, tenant_id: &str) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM floating_ips WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.db)
                .await?,
        )
    }

    async fn tenant_get_network(&self, tenant_id: &str) -> StoreResult<Network> {
        sqlx::query_as::<_, Network>(
            "SELECT id, tenant_id, cidr, host, vpn_private_address FROM networks WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| StoreError::not_found("network", tenant_id))
    }

    async fn network_set_host(&self, network_id: Uuid, host: &str) -> StoreResult<String> {
        let winner: Option<Option<String>> = sqlx::query_scalar(
            "UPDATE networks SET host = COALESCE(host, $2) WHERE id = $1 RETURNING host",
        )
        .bind(network_id)
        .bind(host)
        .fetch_optional(&self.db)
        .await?;
        winner
            .flatten()
            .ok_or_else(|| StoreError::not_found("network", network_id))
    }

    async fn key_pair_create(&self, key_pair: KeyPair) -> StoreResult<()> {
        let res = sqlx::query(
            "INSERT INTO key_pairs (user_id, name, public_key, fingerprint, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, name) DO NOTHING",
        )
        .bind(&key_pair.user_id)
        .bind(&key_pair.name)
        .bind(&key_pair.public_key)
        .bind(&key_pair.fingerprint)
        .bind(key_pair.created_at)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                kind: "key_pair",
                id: key_pair.name,
            });
        }
        Ok(())
    }

    async fn key_pair_get(&self, user_id: &str, name: &str) -> StoreResult<KeyPair> {
        sqlx::query_as::<_, KeyPair>(
            "SELECT user_id, name, public_key, fingerprint, created_at
             FROM key_pairs WHERE user_id = $1 AND name = $2",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| StoreError::not_found("key_pair", name))
    }

    async fn key_pair_get_all_by_user(&self, user_id: &str) -> StoreResult<Vec<KeyPair>> {
        Ok(sqlx::query_as::<_, KeyPair>(
            "SELECT user_id, name, public_key, fingerprint, created_at
             FROM key_pairs WHERE user_id = $1 ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn key_pair_destroy(&self, user_id: &str, name: &str) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM key_pairs WHERE user_id = $1 AND name = $2")
            .bind(user_id)
            .bind(name)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("key_pair", name));
        }
        Ok(())
    }

    async fn quota_get(&self, tenant_id: &str) -> StoreResult<Option<QuotaOverride>> {
        Ok(sqlx::query_as::<_, QuotaOverride>(
            "SELECT tenant_id, instances, cores, volumes, gigabytes, floating_ips
             FROM quotas WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_blocks_stay_whole() {
        let sql = r#"
            DO $$ BEGIN
                CREATE TYPE t AS ENUM ('a');
            EXCEPTION WHEN duplicate_object THEN NULL; END $$;
            CREATE TABLE x (id INT);
            CREATE INDEX i ON x (id)
        "#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].starts_with("DO $$"));
        assert!(stmts[0].ends_with("END $$"));
        assert_eq!(stmts[1], "CREATE TABLE x (id INT)");
        assert_eq!(stmts[2], "CREATE INDEX i ON x (id)");
    }
}

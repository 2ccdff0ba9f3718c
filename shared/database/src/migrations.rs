use anyhow::{Context, Result};
use sqlx::PgPool;

/// Every tenant-owned table carries `tenant_id`; uniqueness is scoped per tenant.
const SCHEMA: &[(&str, &str)] = &[
    (
        "tenants",
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id UUID PRIMARY KEY,
            name VARCHAR(200) NOT NULL,
            drug_license_number VARCHAR(100),
            phone VARCHAR(20),
            address TEXT,
            tier VARCHAR(20) NOT NULL DEFAULT 'COMMUNITY',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            subscription_expires_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            name VARCHAR(100) NOT NULL,
            email VARCHAR(255) NOT NULL UNIQUE,
            phone_number VARCHAR(20),
            role VARCHAR(20) NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            password_hash VARCHAR(255) NOT NULL,
            last_login_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "profiles",
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            user_id UUID PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            phone VARCHAR(20),
            specialization VARCHAR(200),
            address TEXT,
            license_number VARCHAR(100),
            qualifications TEXT,
            experience VARCHAR(100),
            bio TEXT,
            image_url TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "products",
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            sku VARCHAR(50) NOT NULL,
            name VARCHAR(200) NOT NULL,
            description TEXT,
            category VARCHAR(30) NOT NULL,
            unit VARCHAR(20) NOT NULL,
            hsn_code VARCHAR(20),
            gst_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
            price DOUBLE PRECISION NOT NULL DEFAULT 0,
            reorder_level INTEGER NOT NULL DEFAULT 10,
            requires_prescription BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (tenant_id, sku)
        )
        "#,
    ),
    (
        "suppliers",
        r#"
        CREATE TABLE IF NOT EXISTS suppliers (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            name VARCHAR(200) NOT NULL,
            email VARCHAR(255),
            phone VARCHAR(20),
            address TEXT,
            gst_number VARCHAR(15),
            contact_person VARCHAR(100),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "batches",
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            product_id UUID NOT NULL REFERENCES products(id),
            supplier_id UUID NOT NULL REFERENCES suppliers(id),
            batch_number VARCHAR(50) NOT NULL,
            mfg_date DATE NOT NULL,
            expiry_date DATE NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            cost_price DOUBLE PRECISION NOT NULL,
            selling_price DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (tenant_id, product_id, batch_number)
        )
        "#,
    ),
    (
        "stock_movements",
        r#"
        CREATE TABLE IF NOT EXISTS stock_movements (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            product_id UUID NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            batch_id UUID NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
            movement_type VARCHAR(20) NOT NULL,
            quantity INTEGER NOT NULL,
            reason TEXT,
            reference_id UUID,
            user_id UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "prescriptions",
        r#"
        CREATE TABLE IF NOT EXISTS prescriptions (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            patient_name VARCHAR(100) NOT NULL,
            patient_phone VARCHAR(20),
            patient_age INTEGER,
            doctor_name VARCHAR(100),
            uploaded_by UUID NOT NULL REFERENCES users(id),
            validated_by UUID REFERENCES users(id),
            file_url TEXT,
            file_name VARCHAR(255),
            extracted_text TEXT,
            status VARCHAR(30) NOT NULL,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "prescription_items",
        r#"
        CREATE TABLE IF NOT EXISTS prescription_items (
            id UUID PRIMARY KEY,
            prescription_id UUID NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
            product_id UUID REFERENCES products(id),
            medicine_name VARCHAR(200) NOT NULL,
            dosage VARCHAR(100),
            quantity INTEGER,
            instructions TEXT
        )
        "#,
    ),
    (
        "sales",
        r#"
        CREATE TABLE IF NOT EXISTS sales (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            sale_number VARCHAR(30) NOT NULL,
            customer_name VARCHAR(100),
            customer_phone VARCHAR(20),
            prescription_id UUID REFERENCES prescriptions(id),
            sold_by UUID NOT NULL REFERENCES users(id),
            subtotal DOUBLE PRECISION NOT NULL,
            gst_amount DOUBLE PRECISION NOT NULL,
            discount DOUBLE PRECISION NOT NULL DEFAULT 0,
            total_amount DOUBLE PRECISION NOT NULL,
            payment_method VARCHAR(20) NOT NULL,
            status VARCHAR(20) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (tenant_id, sale_number)
        )
        "#,
    ),
    (
        "sale_items",
        r#"
        CREATE TABLE IF NOT EXISTS sale_items (
            id UUID PRIMARY KEY,
            sale_id UUID NOT NULL REFERENCES sales(id) ON DELETE CASCADE,
            product_id UUID NOT NULL REFERENCES products(id),
            batch_id UUID NOT NULL REFERENCES batches(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price DOUBLE PRECISION NOT NULL,
            gst_rate DOUBLE PRECISION NOT NULL,
            gst_amount DOUBLE PRECISION NOT NULL,
            total_amount DOUBLE PRECISION NOT NULL
        )
        "#,
    ),
    (
        "sale_counters",
        r#"
        CREATE TABLE IF NOT EXISTS sale_counters (
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            year INTEGER NOT NULL,
            last_value BIGINT NOT NULL,
            PRIMARY KEY (tenant_id, year)
        )
        "#,
    ),
    (
        "reorder_suggestions",
        r#"
        CREATE TABLE IF NOT EXISTS reorder_suggestions (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            product_id UUID NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            current_stock BIGINT NOT NULL,
            reorder_level INTEGER NOT NULL,
            suggested_quantity INTEGER NOT NULL,
            priority VARCHAR(10) NOT NULL,
            reason TEXT NOT NULL,
            is_processed BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            processed_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "audit_entries",
        r#"
        CREATE TABLE IF NOT EXISTS audit_entries (
            seq BIGSERIAL UNIQUE,
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            timestamp TIMESTAMPTZ NOT NULL,
            action VARCHAR(50) NOT NULL,
            entity_type VARCHAR(50) NOT NULL,
            entity_id UUID NOT NULL,
            user_id UUID,
            details JSONB NOT NULL DEFAULT '{}',
            hash VARCHAR(64) NOT NULL,
            previous_hash VARCHAR(64)
        )
        "#,
    ),
];

/// Columns added after the first release, for databases created before them.
const ADDED_COLUMNS: &[&str] = &["ALTER TABLE profiles ADD COLUMN IF NOT EXISTS image_url TEXT"];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id, role)",
    "CREATE INDEX IF NOT EXISTS idx_products_tenant ON products(tenant_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_suppliers_tenant ON suppliers(tenant_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_batches_product_expiry ON batches(tenant_id, product_id, expiry_date)",
    "CREATE INDEX IF NOT EXISTS idx_movements_tenant_created ON stock_movements(tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_prescriptions_tenant ON prescriptions(tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sales_tenant_created ON sales(tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sale_items_sale ON sale_items(sale_id)",
    "CREATE INDEX IF NOT EXISTS idx_reorder_open ON reorder_suggestions(tenant_id, is_processed)",
    "CREATE INDEX IF NOT EXISTS idx_audit_tenant_seq ON audit_entries(tenant_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_entries(tenant_id, entity_type, entity_id)",
];

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running PostgreSQL migrations");

    for (table, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
    }

    for ddl in ADDED_COLUMNS {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to add column: {}", ddl))?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create index: {}", ddl))?;
    }

    tracing::info!(tables = SCHEMA.len(), "PostgreSQL migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_owned_tables_carry_tenant_id() {
        for (table, ddl) in SCHEMA {
            let child_table = matches!(*table, "tenants" | "profiles" | "prescription_items" | "sale_items");
            if !child_table {
                assert!(ddl.contains("tenant_id UUID NOT NULL"), "{} lacks tenant_id", table);
            }
        }
    }

    #[test]
    fn test_tables_created_after_their_references() {
        let position = |name: &str| SCHEMA.iter().position(|(t, _)| *t == name).unwrap();
        assert!(position("tenants") < position("users"));
        assert!(position("products") < position("batches"));
        assert!(position("suppliers") < position("batches"));
        assert!(position("prescriptions") < position("sales"));
        assert!(position("sales") < position("sale_items"));
    }
}

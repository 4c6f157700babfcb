use crate::{
    DbConn,
    error::{Error, Result},
    models::settings::{Setting, SettingType},
};

const SETTING_COLUMNS: &str =
    "id, setting_key, setting_value, setting_type, description, created_at, updated_at";

pub async fn get_setting(conn: &mut DbConn, key: &str) -> Result<Option<Setting>> {
    let sql = format!("SELECT {SETTING_COLUMNS} FROM admin_settings WHERE setting_key = $1");
    let setting = sqlx::query_as::<_, Setting>(&sql)
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(setting)
}

pub async fn list_settings(conn: &mut DbConn) -> Result<Vec<Setting>> {
    let sql = format!("SELECT {SETTING_COLUMNS} FROM admin_settings ORDER BY setting_key ASC");
    let settings = sqlx::query_as::<_, Setting>(&sql)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(settings)
}

/// Inserts or updates a setting row, keeping the stored value in its
/// canonical string form.
pub async fn upsert_setting(
    conn: &mut DbConn,
    key: &str,
    value: &str,
    setting_type: SettingType,
    description: Option<&str>,
) -> Result<Setting> {
    let sql = format!(
        "INSERT INTO admin_settings (setting_key, setting_value, setting_type, description) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (setting_key) DO UPDATE SET \
             setting_value = EXCLUDED.setting_value, \
             setting_type = EXCLUDED.setting_type, \
             description = COALESCE(EXCLUDED.description, admin_settings.description), \
             updated_at = NOW() \
         RETURNING {SETTING_COLUMNS}"
    );
    let setting = sqlx::query_as::<_, Setting>(&sql)
        .bind(key)
        .bind(value)
        .bind(setting_type)
        .bind(description)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(setting)
}

pub async fn delete_setting(conn: &mut DbConn, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM admin_settings WHERE setting_key = $1")
        .bind(key)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

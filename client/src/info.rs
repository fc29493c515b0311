use {
    crate::{Ctx, remote},
    anyhow::Result,
    blindbackup_protocol::{
        DateTimeUtc, FileEntry, RelativePath, UserInfo,
        endpoints::{GetServerTime, GetUsers, WhoAmI},
    },
    byte_unit::{Byte, UnitType},
    chrono::{DateTime, Local, Utc},
    prettytable::{Table, format::FormatBuilder, row},
    std::fmt::Display,
    tracing::info,
};

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn pretty_time(value: DateTimeUtc) -> impl Display {
    DateTime::<Local>::from(value).format(DATE_TIME_FORMAT)
}

pub fn pretty_size(size: u64) -> String {
    format!(
        "{:.1}",
        Byte::from_u64(size).get_appropriate_unit(UnitType::Binary)
    )
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(FormatBuilder::new().column_separator(' ').build());
    table
}

fn entries_table<'a>(entries: impl IntoIterator<Item = &'a FileEntry>) -> Table {
    let mut table = new_table();
    for entry in entries {
        if entry.is_dir {
            table.add_row(row![pretty_time(entry.modified_at), "", format!("{}/", entry.path)]);
        } else {
            table.add_row(row![
                pretty_time(entry.modified_at),
                r->pretty_size(entry.size),
                entry.path
            ]);
        }
    }
    table
}

fn users_table(users: &[UserInfo]) -> Table {
    let mut table = new_table();
    table.add_row(row!["Login", "Permissions", "Home"]);
    for user in users {
        table.add_row(row![user.name, user.permissions, user.home]);
    }
    table
}

pub async fn ls(ctx: &Ctx, path: &RelativePath, recursive: bool) -> Result<()> {
    let listing = remote::list(ctx, path, recursive).await?;
    if listing.is_empty() {
        info!("{path}: empty");
        return Ok(());
    }
    info!("{}", entries_table(listing.iter()));
    Ok(())
}

pub async fn server_time(ctx: &Ctx) -> Result<()> {
    let time = ctx.client.request(&GetServerTime).await?;
    let offset = time.signed_duration_since(Utc::now());
    info!(
        "server time: {} (offset: {} ms)",
        pretty_time(time),
        offset.num_milliseconds()
    );
    Ok(())
}

pub async fn who_am_i(ctx: &Ctx) -> Result<()> {
    let user = ctx.client.request(&WhoAmI).await?;
    info!("login: {}", user.name);
    info!("home: {}", user.home);
    info!("permissions: {}", user.permissions);
    Ok(())
}

pub async fn users(ctx: &Ctx) -> Result<()> {
    let users = ctx.client.request(&GetUsers).await?;
    info!("{}", users_table(&users));
    Ok(())
}

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};

const XP_BASE_MULTIPLIER: f64 = 100.0;

/// Level reached with `xp` total experience: `(xp / 100)^(2/3)`.
pub fn level_from_xp(xp: u64) -> u32 {
    if xp == 0 {
        return 0;
    }
    (xp as f64 / XP_BASE_MULTIPLIER).powf(2.0 / 3.0) as u32
}

/// Cumulative counters for one member of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCounters {
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
    pub total_messages: u64,
    pub voice_minutes: u64,
    /// Cleared when the member leaves; inactive members are not snapshotted.
    pub is_active: bool,
}

impl MemberCounters {
    fn new(user_id: u64) -> Self {
        Self {
            user_id,
            xp: 0,
            level: 0,
            total_messages: 0,
            voice_minutes: 0,
            is_active: true,
        }
    }
}

/// Increment applied by [`SnapshotStore::record_activity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub xp: u64,
    pub messages: u64,
    pub voice_minutes: u64,
}

/// One member's counters as of the start of `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub user_id: u64,
    pub date: NaiveDate,
    pub xp_total: u64,
    pub level: u32,
    pub total_messages: u64,
    pub voice_minutes: u64,
}

/// Time range a leaderboard is ranked over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    All,
    Month,
    Week,
    Today,
}

impl Period {
    /// Lenient parse for query strings; anything unknown ranks all-time.
    pub fn parse_or_all(value: &str) -> Self {
        match value {
            "month" => Period::Month,
            "week" => Period::Week,
            "today" => Period::Today,
            _ => Period::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::All => "all",
            Period::Month => "month",
            Period::Week => "week",
            Period::Today => "today",
        }
    }

    /// Snapshot date the period's XP gain is measured from. `None` for all-time.
    pub fn since(&self, today: NaiveDate) -> Option<NaiveDate> {
        let days = match self {
            Period::All => return None,
            Period::Today => 0,
            Period::Week => 7,
            Period::Month => 30,
        };
        today.checked_sub_days(Days::new(days))
    }
}

/// One ranked member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
    pub total_messages: u64,
    pub voice_minutes: u64,
    /// XP earned since the period's snapshot; absent for all-time boards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xp_gained: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeaderboardPage {
    pub rows: Vec<LeaderboardRow>,
    /// Ranked members across all pages.
    pub total: usize,
}

/// Persistent store behind the daily snapshot loop.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn has_snapshot(&self, guild_id: u64, date: NaiveDate) -> Result<bool>;

    /// Copies every active member's counters into a snapshot for `date`.
    ///
    /// Members already snapshotted for `date` are left untouched. Returns
    /// the number of rows written.
    async fn create_snapshot(&self, guild_id: u64, date: NaiveDate) -> Result<usize>;

    /// Deletes snapshots dated strictly before `cutoff`. Returns rows removed.
    async fn delete_before(&self, guild_id: u64, cutoff: NaiveDate) -> Result<usize>;

    async fn record_activity(&self, guild_id: u64, user_id: u64, activity: Activity) -> Result<()>;

    async fn set_active(&self, guild_id: u64, user_id: u64, active: bool) -> Result<()>;

    async fn counters(&self, guild_id: u64, user_id: u64) -> Result<Option<MemberCounters>>;

    /// Active members ranked by total XP, or by XP gained since `since` when
    /// given. Members without a row in that snapshot count from zero.
    async fn leaderboard(
        &self,
        guild_id: u64,
        since: Option<NaiveDate>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage>;
}

#[derive(Debug, Default)]
struct GuildData {
    members: HashMap<u64, MemberCounters>,
    /// date -> user -> row
    snapshots: BTreeMap<NaiveDate, HashMap<u64, SnapshotRow>>,
}

/// Snapshot store backed by JSON files.
///
/// Each guild gets a directory holding `members.json` with the running
/// counters and `snapshots/<date>.json` per snapshot day, so activity writes
/// never touch the snapshot history. Everything is loaded at startup and
/// kept in memory.
pub struct JsonSnapshotStore {
    data_dir: PathBuf,
    guilds: Mutex<HashMap<u64, GuildData>>,
}

impl JsonSnapshotStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().join("guilds");
        fs::create_dir_all(&data_dir).await?;

        info!("📁 Snapshot store initialized at: {}", data_dir.display());

        let guilds = Self::load_all(&data_dir).await?;

        Ok(Self {
            data_dir,
            guilds: Mutex::new(guilds),
        })
    }

    // Métodos privados

    async fn load_all(data_dir: &Path) -> Result<HashMap<u64, GuildData>> {
        let mut guilds = HashMap::new();
        let mut dirs = fs::read_dir(data_dir).await?;

        while let Some(entry) = dirs.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let Some(guild_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match Self::load_guild(&path).await {
                Ok(data) => {
                    guilds.insert(guild_id, data);
                }
                Err(e) => {
                    warn!("Error loading data for guild {}: {}", guild_id, e);
                }
            }
        }

        if !guilds.is_empty() {
            info!("📂 Loaded data for {} guilds", guilds.len());
        }

        Ok(guilds)
    }

    async fn load_guild(dir: &Path) -> Result<GuildData> {
        let mut data = GuildData::default();

        let members_path = dir.join("members.json");
        if fs::try_exists(&members_path).await? {
            let content = fs::read_to_string(&members_path).await?;
            data.members = serde_json::from_str(&content)?;
        }

        let snapshots_dir = dir.join("snapshots");
        if !fs::try_exists(&snapshots_dir).await? {
            return Ok(data);
        }

        let mut files = fs::read_dir(&snapshots_dir).await?;
        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(date) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<NaiveDate>().ok())
            else {
                continue;
            };

            let content = fs::read_to_string(&path).await?;
            let rows: Vec<SnapshotRow> = serde_json::from_str(&content)?;
            data.snapshots
                .insert(date, rows.into_iter().map(|row| (row.user_id, row)).collect());
        }

        Ok(data)
    }

    async fn save_members(&self, guild_id: u64, members: &HashMap<u64, MemberCounters>) -> Result<()> {
        let dir = self.guild_dir(guild_id);
        fs::create_dir_all(&dir).await?;
        write_json(&dir.join("members.json"), members).await
    }

    async fn save_snapshot(&self, guild_id: u64, date: NaiveDate, rows: &HashMap<u64, SnapshotRow>) -> Result<()> {
        let dir = self.guild_dir(guild_id).join("snapshots");
        fs::create_dir_all(&dir).await?;

        let mut rows: Vec<&SnapshotRow> = rows.values().collect();
        rows.sort_by_key(|row| row.user_id);
        write_json(&dir.join(format!("{}.json", date)), &rows).await
    }

    async fn remove_snapshot(&self, guild_id: u64, date: NaiveDate) -> Result<()> {
        let path = self.guild_dir(guild_id).join("snapshots").join(format!("{}.json", date));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn guild_dir(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join(format!("guild_{}", guild_id))
    }
}

/// Writes through a temporary file so a crash never leaves half a document.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn counters(&self, guild_id: u64, user_id: u64) -> Result<Option<MemberCounters>> {
        let guilds = self.guilds.lock().await;
        Ok(guilds
            .get(&guild_id)
            .and_then(|guild| guild.members.get(&user_id))
            .cloned())
    }

    async fn has_snapshot(&self, guild_id: u64, date: NaiveDate) -> Result<bool> {
        let guilds = self.guilds.lock().await;
        Ok(guilds
            .get(&guild_id)
            .and_then(|guild| guild.snapshots.get(&date))
            .is_some_and(|rows| !rows.is_empty()))
    }

    async fn create_snapshot(&self, guild_id: u64, date: NaiveDate) -> Result<usize> {
        let mut guilds = self.guilds.lock().await;
        let guild = guilds.entry(guild_id).or_default();

        let GuildData { members, snapshots } = &mut *guild;
        let rows = snapshots.entry(date).or_default();
        let mut written = 0;

        for member in members.values().filter(|m| m.is_active) {
            if rows.contains_key(&member.user_id) {
                continue;
            }
            rows.insert(
                member.user_id,
                SnapshotRow {
                    user_id: member.user_id,
                    date,
                    xp_total: member.xp,
                    level: member.level,
                    total_messages: member.total_messages,
                    voice_minutes: member.voice_minutes,
                },
            );
            written += 1;
        }

        if written > 0 {
            self.save_snapshot(guild_id, date, rows).await?;
        } else if rows.is_empty() {
            snapshots.remove(&date);
        }
        debug!("📸 Snapshot {} for guild {}: {} rows", date, guild_id, written);

        Ok(written)
    }

    async fn delete_before(&self, guild_id: u64, cutoff: NaiveDate) -> Result<usize> {
        let mut guilds = self.guilds.lock().await;
        let Some(guild) = guilds.get_mut(&guild_id) else {
            return Ok(0);
        };

        let kept = guild.snapshots.split_off(&cutoff);
        let expired = std::mem::replace(&mut guild.snapshots, kept);

        let mut removed = 0;
        for (date, rows) in expired {
            self.remove_snapshot(guild_id, date).await?;
            removed += rows.len();
        }

        if removed > 0 {
            info!("🗑️ Deleted {} snapshot rows before {} for guild {}", removed, cutoff, guild_id);
        }

        Ok(removed)
    }

    async fn record_activity(&self, guild_id: u64, user_id: u64, activity: Activity) -> Result<()> {
        let mut guilds = self.guilds.lock().await;
        let guild = guilds.entry(guild_id).or_default();

        let member = guild
            .members
            .entry(user_id)
            .or_insert_with(|| MemberCounters::new(user_id));
        member.xp = member.xp.saturating_add(activity.xp);
        member.level = level_from_xp(member.xp);
        member.total_messages = member.total_messages.saturating_add(activity.messages);
        member.voice_minutes = member.voice_minutes.saturating_add(activity.voice_minutes);
        member.is_active = true;

        self.save_members(guild_id, &guild.members).await
    }

    async fn set_active(&self, guild_id: u64, user_id: u64, active: bool) -> Result<()> {
        let mut guilds = self.guilds.lock().await;
        let member = guilds
            .get_mut(&guild_id)
            .and_then(|guild| guild.members.get_mut(&user_id));

        match member {
            Some(member) if member.is_active != active => member.is_active = active,
            Some(_) => return Ok(()),
            None if !active => return Ok(()),
            None => {
                return Err(BotError::Store(format!(
                    "unknown member {} in guild {}",
                    user_id, guild_id
                )))
            }
        }

        match guilds.get(&guild_id) {
            Some(guild) => self.save_members(guild_id, &guild.members).await,
            None => Ok(()),
        }
    }

    async fn leaderboard(
        &self,
        guild_id: u64,
        since: Option<NaiveDate>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage> {
        let guilds = self.guilds.lock().await;
        let Some(guild) = guilds.get(&guild_id) else {
            return Ok(LeaderboardPage::default());
        };

        let baseline = since.and_then(|date| guild.snapshots.get(&date));
        let mut ranked: Vec<(&MemberCounters, Option<u64>)> = guild
            .members
            .values()
            .filter(|member| member.is_active)
            .filter_map(|member| match since {
                None => (member.xp > 0).then_some((member, None)),
                Some(_) => {
                    let start = baseline
                        .and_then(|rows| rows.get(&member.user_id))
                        .map_or(0, |row| row.xp_total);
                    let gained = member.xp.saturating_sub(start);
                    (gained > 0).then_some((member, Some(gained)))
                }
            })
            .collect();

        ranked.sort_by(|(a, a_gained), (b, b_gained)| {
            b_gained
                .cmp(a_gained)
                .then(b.xp.cmp(&a.xp))
                .then(a.user_id.cmp(&b.user_id))
        });

        let total = ranked.len();
        let rows = ranked
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, (member, xp_gained))| LeaderboardRow {
                rank: index + 1,
                user_id: member.user_id,
                xp: member.xp,
                level: member.level,
                total_messages: member.total_messages,
                voice_minutes: member.voice_minutes,
                xp_gained,
            })
            .collect();

        Ok(LeaderboardPage { rows, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const GUILD: u64 = 42;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn chat(xp: u64) -> Activity {
        Activity {
            xp,
            messages: 1,
            voice_minutes: 0,
        }
    }

    async fn snapshot_rows(store: &JsonSnapshotStore, date: NaiveDate) -> Vec<SnapshotRow> {
        let guilds = store.guilds.lock().await;
        let mut rows: Vec<SnapshotRow> = guilds
            .get(&GUILD)
            .and_then(|guild| guild.snapshots.get(&date))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|row| row.user_id);
        rows
    }

    #[test]
    fn level_curve() {
        assert_eq!(level_from_xp(0), 0);
        assert_eq!(level_from_xp(99), 0);
        assert_eq!(level_from_xp(100), 1);
        assert_eq!(level_from_xp(10_000), 21);
    }

    #[tokio::test]
    async fn snapshot_copies_active_members_once() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();

        store.record_activity(GUILD, 1, chat(150)).await.unwrap();
        store.record_activity(GUILD, 2, chat(20)).await.unwrap();
        store.record_activity(GUILD, 3, chat(5)).await.unwrap();
        store.set_active(GUILD, 3, false).await.unwrap();

        assert!(!store.has_snapshot(GUILD, date(10)).await.unwrap());
        assert_eq!(store.create_snapshot(GUILD, date(10)).await.unwrap(), 2);
        assert!(store.has_snapshot(GUILD, date(10)).await.unwrap());

        // Counters move on but the existing rows are kept.
        store.record_activity(GUILD, 1, chat(50)).await.unwrap();
        assert_eq!(store.create_snapshot(GUILD, date(10)).await.unwrap(), 0);

        let rows = snapshot_rows(&store, date(10)).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].xp_total, 150);
        assert_eq!(rows[0].level, 1);
    }

    #[tokio::test]
    async fn retention_deletes_strictly_older_dates() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        store.record_activity(GUILD, 1, chat(10)).await.unwrap();

        for day in 1..=5 {
            store.create_snapshot(GUILD, date(day)).await.unwrap();
        }

        assert_eq!(store.delete_before(GUILD, date(3)).await.unwrap(), 2);
        assert!(!store.has_snapshot(GUILD, date(2)).await.unwrap());
        assert!(store.has_snapshot(GUILD, date(3)).await.unwrap());
        assert_eq!(store.delete_before(GUILD, date(3)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn data_survives_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
            store.record_activity(GUILD, 7, chat(300)).await.unwrap();
            store.create_snapshot(GUILD, date(1)).await.unwrap();
        }

        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        assert!(store.has_snapshot(GUILD, date(1)).await.unwrap());
        assert_eq!(store.counters(GUILD, 7).await.unwrap().unwrap().xp, 300);
    }

    #[tokio::test]
    async fn activity_writes_leave_snapshot_files_alone() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        store.record_activity(GUILD, 1, chat(10)).await.unwrap();
        store.create_snapshot(GUILD, date(10)).await.unwrap();

        let guild_dir = dir.path().join("guilds").join(format!("guild_{}", GUILD));
        let snapshot_file = guild_dir.join("snapshots").join("2024-06-10.json");
        let before = std::fs::read_to_string(&snapshot_file).unwrap();

        store.record_activity(GUILD, 1, chat(40)).await.unwrap();

        assert_eq!(std::fs::read_to_string(&snapshot_file).unwrap(), before);
        let members = std::fs::read_to_string(guild_dir.join("members.json")).unwrap();
        assert!(members.contains("\"xp\": 50"));
        assert!(!members.contains("xp_total"));
    }

    #[tokio::test]
    async fn retention_removes_snapshot_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        store.record_activity(GUILD, 1, chat(10)).await.unwrap();
        store.create_snapshot(GUILD, date(1)).await.unwrap();
        store.create_snapshot(GUILD, date(2)).await.unwrap();

        store.delete_before(GUILD, date(2)).await.unwrap();

        let snapshots = dir.path().join("guilds").join(format!("guild_{}", GUILD)).join("snapshots");
        assert!(!snapshots.join("2024-06-01.json").exists());
        assert!(snapshots.join("2024-06-02.json").exists());

        let reloaded = JsonSnapshotStore::new(dir.path()).await.unwrap();
        assert!(!reloaded.has_snapshot(GUILD, date(1)).await.unwrap());
        assert!(reloaded.has_snapshot(GUILD, date(2)).await.unwrap());
    }

    #[tokio::test]
    async fn all_time_leaderboard_ranks_active_members_by_xp() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        store.record_activity(GUILD, 1, chat(50)).await.unwrap();
        store.record_activity(GUILD, 2, chat(300)).await.unwrap();
        store.record_activity(GUILD, 3, chat(120)).await.unwrap();
        store.record_activity(GUILD, 4, chat(900)).await.unwrap();
        store.set_active(GUILD, 4, false).await.unwrap();

        let page = store.leaderboard(GUILD, None, 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        let ranked: Vec<(usize, u64)> = page.rows.iter().map(|row| (row.rank, row.user_id)).collect();
        assert_eq!(ranked, vec![(1, 2), (2, 3)]);
        assert_eq!(page.rows[0].xp_gained, None);

        let second = store.leaderboard(GUILD, None, 2, 2).await.unwrap();
        assert_eq!(second.rows.len(), 1);
        assert_eq!((second.rows[0].rank, second.rows[0].user_id), (3, 1));
    }

    #[tokio::test]
    async fn period_leaderboard_ranks_by_gain_since_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        store.record_activity(GUILD, 1, chat(1000)).await.unwrap();
        store.record_activity(GUILD, 2, chat(100)).await.unwrap();
        store.create_snapshot(GUILD, date(3)).await.unwrap();

        store.record_activity(GUILD, 1, chat(20)).await.unwrap();
        store.record_activity(GUILD, 2, chat(200)).await.unwrap();
        // Joined after the snapshot: counts from zero.
        store.record_activity(GUILD, 3, chat(50)).await.unwrap();

        let page = store.leaderboard(GUILD, Some(date(3)), 10, 0).await.unwrap();
        let gains: Vec<(u64, Option<u64>)> = page.rows.iter().map(|row| (row.user_id, row.xp_gained)).collect();
        assert_eq!(gains, vec![(2, Some(200)), (3, Some(50)), (1, Some(20))]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn period_start_dates() {
        assert_eq!(Period::parse_or_all("week"), Period::Week);
        assert_eq!(Period::parse_or_all("forever"), Period::All);
        assert_eq!(Period::All.since(date(30)), None);
        assert_eq!(Period::Today.since(date(30)), Some(date(30)));
        assert_eq!(Period::Week.since(date(30)), Some(date(23)));
        assert_eq!(Period::Month.since(date(30)), Some(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()));
    }

    #[tokio::test]
    async fn empty_guild_writes_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path()).await.unwrap();
        assert_eq!(store.create_snapshot(GUILD, date(1)).await.unwrap(), 0);
        assert!(!store.has_snapshot(GUILD, date(1)).await.unwrap());
    }
}

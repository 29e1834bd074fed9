use std::fmt;

/// Teaching days. The UI and legacy imports send these in whatever casing
/// they like, so parsing is case-insensitive; storage uses `as_str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn parse(s: &str) -> Option<Weekday> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Some(Weekday::Monday),
            "tuesday" => Some(Weekday::Tuesday),
            "wednesday" => Some(Weekday::Wednesday),
            "thursday" => Some(Weekday::Thursday),
            "friday" => Some(Weekday::Friday),
            "saturday" => Some(Weekday::Saturday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
        }
    }
}

/// Minutes since midnight. Formats as HH:MM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: i64) -> Option<TimeOfDay> {
        if (0..24 * 60).contains(&minutes) {
            Some(TimeOfDay(minutes as u16))
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Option<TimeOfDay> {
        let (h, m) = s.trim().split_once(':')?;
        let h: u16 = h.parse().ok()?;
        let m: u16 = m.parse().ok()?;
        if h >= 24 || m >= 60 {
            return None;
        }
        Some(TimeOfDay(h * 60 + m))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// A time-of-day interval with `start < end` guaranteed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Option<TimeWindow> {
        if start < end {
            Some(TimeWindow { start, end })
        } else {
            None
        }
    }

    pub fn start(self) -> TimeOfDay {
        self.start
    }

    pub fn end(self) -> TimeOfDay {
        self.end
    }

    /// Half-open overlap test. Touching endpoints do not overlap, so
    /// back-to-back bookings of the same room or teacher are legal.
    pub fn overlaps(self, other: TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// One scheduled occurrence: a subject taught to a class, optionally by a
/// teacher, optionally in a room, on a weekday within a time window.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: String,
    pub academic_year_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: Option<String>,
    pub weekday: Weekday,
    pub window: TimeWindow,
    pub room: Option<String>,
}

/// A candidate entry that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub academic_year_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: Option<String>,
    pub weekday: Weekday,
    pub window: TimeWindow,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictKind {
    Class,
    Teacher,
    Room,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::Class => "class",
            ConflictKind::Teacher => "teacher",
            ConflictKind::Room => "room",
        }
    }
}

/// Two overlapping entries sharing one resource dimension. A pair of
/// entries sharing several dimensions yields one record per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub first_id: String,
    pub second_id: String,
    pub kind: ConflictKind,
}

/// One colliding existing entry for a candidate, with the dimensions it
/// collides on.
#[derive(Debug, Clone)]
pub struct CandidateConflict<'a> {
    pub entry: &'a ScheduleEntry,
    pub kinds: Vec<ConflictKind>,
}

fn shared_dimensions(
    a_class: &str,
    a_teacher: Option<&str>,
    a_room: Option<&str>,
    b_class: &str,
    b_teacher: Option<&str>,
    b_room: Option<&str>,
) -> Vec<ConflictKind> {
    let mut kinds = Vec::new();
    if a_class == b_class {
        kinds.push(ConflictKind::Class);
    }
    if let (Some(a), Some(b)) = (a_teacher, b_teacher) {
        if a == b {
            kinds.push(ConflictKind::Teacher);
        }
    }
    // Rooms only collide when both sides name one.
    if let (Some(a), Some(b)) = (a_room, b_room) {
        if !a.is_empty() && a == b {
            kinds.push(ConflictKind::Room);
        }
    }
    kinds
}

/// Pairwise conflict scan over one academic year. Entries outside the
/// given year are ignored; entries in different years never conflict.
///
/// Each unordered pair is visited exactly once (id order), so the output
/// carries no mirrored duplicates and is deterministic for a given input.
/// School-scale data stays in the low hundreds of entries per year, so the
/// quadratic sweep per weekday is fine.
pub fn detect_conflicts(entries: &[ScheduleEntry], academic_year_id: &str) -> Vec<ConflictPair> {
    let mut scoped: Vec<&ScheduleEntry> = entries
        .iter()
        .filter(|e| e.academic_year_id == academic_year_id)
        .collect();
    scoped.sort_by(|a, b| a.id.cmp(&b.id));

    let mut pairs = Vec::new();
    for i in 0..scoped.len() {
        for j in (i + 1)..scoped.len() {
            let (a, b) = (scoped[i], scoped[j]);
            if a.id == b.id {
                // Duplicate rows for the same entry must not self-report.
                continue;
            }
            if a.weekday != b.weekday || !a.window.overlaps(b.window) {
                continue;
            }
            for kind in shared_dimensions(
                &a.class_id,
                a.teacher_id.as_deref(),
                a.room.as_deref(),
                &b.class_id,
                b.teacher_id.as_deref(),
                b.room.as_deref(),
            ) {
                pairs.push(ConflictPair {
                    first_id: a.id.clone(),
                    second_id: b.id.clone(),
                    kind,
                });
            }
        }
    }
    pairs
}

/// Pre-insert check: every existing entry the candidate would collide
/// with, classified per dimension. Callers reject the write when this is
/// non-empty; nothing here mutates state. Must run inside the same
/// transaction as the insert it guards.
pub fn would_conflict<'a>(
    candidate: &EntryDraft,
    existing: &'a [ScheduleEntry],
) -> Vec<CandidateConflict<'a>> {
    let mut hits = Vec::new();
    for entry in existing {
        if entry.academic_year_id != candidate.academic_year_id
            || entry.weekday != candidate.weekday
            || !entry.window.overlaps(candidate.window)
        {
            continue;
        }
        let kinds = shared_dimensions(
            &candidate.class_id,
            candidate.teacher_id.as_deref(),
            candidate.room.as_deref(),
            &entry.class_id,
            entry.teacher_id.as_deref(),
            entry.room.as_deref(),
        );
        if !kinds.is_empty() {
            hits.push(CandidateConflict { entry, kinds });
        }
    }
    hits
}

/// One slot produced by bulk generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSlot {
    pub weekday: Weekday,
    pub window: TimeWindow,
    pub subject_id: String,
}

/// Round-robin subject placement across weekday x slot positions. Slots
/// overlapping the lunch window are left empty. Subjects cycle when there
/// are more slots than subjects.
///
/// This only guarantees one subject per slot within the class being
/// generated; cross-class collisions (a teacher booked twice) are caught
/// afterwards by the conflict scan, not prevented here.
pub fn plan_slots(
    subject_ids: &[String],
    weekdays: &[Weekday],
    slots: &[TimeWindow],
    lunch: Option<TimeWindow>,
) -> Vec<PlannedSlot> {
    if subject_ids.is_empty() {
        return Vec::new();
    }
    let mut planned = Vec::new();
    let mut next = 0usize;
    for &weekday in weekdays {
        for &window in slots {
            if lunch.map(|l| l.overlaps(window)).unwrap_or(false) {
                continue;
            }
            planned.push(PlannedSlot {
                weekday,
                window,
                subject_id: subject_ids[next % subject_ids.len()].clone(),
            });
            next += 1;
        }
    }
    planned
}

//! Calendar views over a flat task list.
//!
//! Everything here is a pure function of its inputs: the same tasks, mode and
//! reference date always produce the same view, and the input slice is never
//! mutated.

use crate::models::Task;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum::{Display, EnumString};

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const SHORT_MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub const MONTH_GRID_CELLS: usize = 42;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ViewMode {
    #[default]
    All,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrder {
    /// Newest first, id as tiebreak.
    #[default]
    CreatedDesc,
    /// Due date then due time; no due time sorts as start of day.
    DueAsc,
}

pub fn sort_tasks(tasks: &mut [Task], order: TaskOrder) {
    tasks.sort_by(|a, b| compare(a, b, order));
}

fn compare(a: &Task, b: &Task, order: TaskOrder) -> Ordering {
    match order {
        TaskOrder::CreatedDesc => b
            .created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id)),
        TaskOrder::DueAsc => a
            .due_at()
            .cmp(&b.due_at())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id)),
    }
}

/// Monday and Sunday of the week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// ISO-8601 week number (weeks start Monday, week 1 holds the first Thursday).
pub fn iso_week_number(date: NaiveDate) -> u32 {
    date.iso_week().week()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Whether `task` falls inside the window `mode` selects around `reference`.
pub fn in_window(task: &Task, mode: ViewMode, reference: NaiveDate) -> bool {
    match mode {
        ViewMode::All => true,
        ViewMode::Day => task.due_date == reference,
        ViewMode::Week => {
            let (monday, sunday) = week_bounds(reference);
            task.due_date >= monday && task.due_date <= sunday
        }
        ViewMode::Month => same_month(task.due_date, reference),
    }
}

/// Flat list of the tasks in the window, in `TaskOrder::CreatedDesc`.
pub fn filter_tasks(tasks: &[Task], mode: ViewMode, reference: NaiveDate) -> Vec<Task> {
    let mut selected: Vec<Task> = tasks
        .iter()
        .filter(|task| in_window(task, mode, reference))
        .cloned()
        .collect();
    sort_tasks(&mut selected, TaskOrder::default());
    selected
}

fn collect_on(tasks: &[Task], date: NaiveDate, order: TaskOrder) -> Vec<Task> {
    let mut bucket: Vec<Task> = tasks
        .iter()
        .filter(|task| task.due_date == date)
        .cloned()
        .collect();
    sort_tasks(&mut bucket, order);
    bucket
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagGroup {
    pub tag: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekDay {
    pub date: NaiveDate,
    pub day_name: &'static str,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekView {
    pub monday: NaiveDate,
    pub sunday: NaiveDate,
    /// ISO week-numbering year, so the title never pairs week 1 with the
    /// previous calendar year.
    pub year: i32,
    pub week_number: u32,
    pub label: String,
    pub days: Vec<WeekDay>,
}

impl WeekView {
    /// `"Jun 10 - 16"` within one month, `"May 27 - Jun 2"` across two.
    pub fn label_for(monday: NaiveDate, sunday: NaiveDate) -> String {
        let start = SHORT_MONTH_NAMES[monday.month0() as usize];
        if monday.month() == sunday.month() {
            format!("{start} {} - {}", monday.day(), sunday.day())
        } else {
            let end = SHORT_MONTH_NAMES[sunday.month0() as usize];
            format!("{start} {} - {end} {}", monday.day(), sunday.day())
        }
    }

    /// Title shown above the week, e.g. `"2024 (Week 24) Jun 10 - 16"`.
    pub fn title(&self) -> String {
        format!("{} (Week {}) {}", self.year, self.week_number, self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthCell {
    pub date: NaiveDate,
    pub day: u32,
    pub in_current_month: bool,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub month_name: &'static str,
    pub cells: Vec<MonthCell>,
}

impl MonthGrid {
    /// The six Monday-first rows of the grid.
    pub fn rows(&self) -> impl Iterator<Item = &[MonthCell]> {
        self.cells.chunks(7)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum View {
    All { groups: Vec<TagGroup> },
    Day(DayView),
    Week(WeekView),
    Month(MonthGrid),
}

impl View {
    pub fn mode(&self) -> ViewMode {
        match self {
            View::All { .. } => ViewMode::All,
            View::Day(_) => ViewMode::Day,
            View::Week(_) => ViewMode::Week,
            View::Month(_) => ViewMode::Month,
        }
    }

    /// Every task placed in the view, bucket by bucket.
    pub fn tasks(&self) -> Vec<&Task> {
        match self {
            View::All { groups } => groups.iter().flat_map(|g| g.tasks.iter()).collect(),
            View::Day(day) => day.tasks.iter().collect(),
            View::Week(week) => week.days.iter().flat_map(|d| d.tasks.iter()).collect(),
            View::Month(grid) => grid.cells.iter().flat_map(|c| c.tasks.iter()).collect(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks().len()
    }
}

pub fn build_view(tasks: &[Task], mode: ViewMode, reference: NaiveDate, order: TaskOrder) -> View {
    match mode {
        ViewMode::All => View::All {
            groups: group_by_tag(tasks, order),
        },
        ViewMode::Day => View::Day(DayView {
            date: reference,
            tasks: collect_on(tasks, reference, order),
        }),
        ViewMode::Week => View::Week(build_week(tasks, reference, order)),
        ViewMode::Month => View::Month(build_month(tasks, reference, order)),
    }
}

fn group_by_tag(tasks: &[Task], order: TaskOrder) -> Vec<TagGroup> {
    let mut ordered = tasks.to_vec();
    sort_tasks(&mut ordered, order);

    let mut groups: Vec<TagGroup> = Vec::new();
    for task in ordered {
        match groups.iter_mut().find(|g| g.tag == task.tag) {
            Some(group) => group.tasks.push(task),
            None => groups.push(TagGroup {
                tag: task.tag.clone(),
                tasks: vec![task],
            }),
        }
    }
    groups
}

pub fn build_week(tasks: &[Task], reference: NaiveDate, order: TaskOrder) -> WeekView {
    let (monday, sunday) = week_bounds(reference);
    let days = monday
        .iter_days()
        .take(7)
        .zip(DAY_NAMES)
        .map(|(date, day_name)| WeekDay {
            date,
            day_name,
            tasks: collect_on(tasks, date, order),
        })
        .collect();

    WeekView {
        monday,
        sunday,
        year: monday.iso_week().year(),
        week_number: iso_week_number(monday),
        label: WeekView::label_for(monday, sunday),
        days,
    }
}

pub fn build_month(tasks: &[Task], reference: NaiveDate, order: TaskOrder) -> MonthGrid {
    let first = first_of_month(reference);
    let grid_start = first - Duration::days(i64::from(first.weekday().num_days_from_monday()));

    let cells = grid_start
        .iter_days()
        .take(MONTH_GRID_CELLS)
        .map(|date| {
            let in_current_month = same_month(date, first);
            MonthCell {
                date,
                day: date.day(),
                in_current_month,
                // Adjacent-month cells stay empty so each task lands in one grid.
                tasks: if in_current_month {
                    collect_on(tasks, date, order)
                } else {
                    Vec::new()
                },
            }
        })
        .collect();

    MonthGrid {
        year: first.year(),
        month: first.month(),
        month_name: MONTH_NAMES[first.month0() as usize],
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskDraft, TaskId};
    use chrono::{NaiveTime, TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task(id: &str, due: NaiveDate, created_secs: i64) -> Task {
        TaskDraft::new(format!("task {id}"), due).into_task(
            TaskId::from(id),
            "user-1",
            Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_week_bounds_start_on_monday() {
        assert_eq!(week_bounds(date(2024, 6, 10)), (date(2024, 6, 10), date(2024, 6, 16)));
        assert_eq!(week_bounds(date(2024, 6, 16)), (date(2024, 6, 10), date(2024, 6, 16)));
        assert_eq!(week_bounds(date(2024, 6, 2)), (date(2024, 5, 27), date(2024, 6, 2)));
    }

    #[test]
    fn test_week_labels() {
        assert_eq!(WeekView::label_for(date(2024, 6, 10), date(2024, 6, 16)), "Jun 10 - 16");
        assert_eq!(WeekView::label_for(date(2024, 5, 27), date(2024, 6, 2)), "May 27 - Jun 2");
    }

    #[test]
    fn test_week_view_numbers_and_buckets() {
        let tasks = vec![
            task("a", date(2024, 6, 10), 0),
            task("b", date(2024, 6, 16), 1),
            task("c", date(2024, 6, 17), 2),
        ];
        let week = build_week(&tasks, date(2024, 6, 12), TaskOrder::CreatedDesc);
        assert_eq!(week.week_number, 24);
        assert_eq!(week.year, 2024);
        assert_eq!(week.days.len(), 7);
        assert_eq!(week.days[0].day_name, "Mon");
        assert_eq!(week.days[0].tasks[0].id.as_str(), "a");
        assert_eq!(week.days[6].tasks[0].id.as_str(), "b");
        assert_eq!(week.title(), "2024 (Week 24) Jun 10 - 16");
    }

    #[test]
    fn test_iso_week_at_year_boundary() {
        // Monday 2024-12-30 belongs to ISO week 1 of 2025.
        assert_eq!(iso_week_number(date(2024, 12, 30)), 1);
        assert_eq!(iso_week_number(date(2021, 1, 3)), 53);
    }

    #[test]
    fn test_week_title_uses_iso_year() {
        let week = build_week(&[], date(2025, 1, 1), TaskOrder::CreatedDesc);
        assert_eq!(week.monday, date(2024, 12, 30));
        assert_eq!(week.year, 2025);
        assert_eq!(week.title(), "2025 (Week 1) Dec 30 - Jan 5");

        let week = build_week(&[], date(2021, 1, 3), TaskOrder::CreatedDesc);
        assert_eq!(week.year, 2020);
        assert_eq!(week.week_number, 53);
    }

    #[test]
    fn test_march_2024_grid() {
        let tasks = vec![task("a", date(2024, 2, 28), 0), task("b", date(2024, 3, 1), 1)];
        let grid = build_month(&tasks, date(2024, 3, 15), TaskOrder::CreatedDesc);

        assert_eq!(grid.cells.len(), 42);
        assert_eq!(grid.month_name, "March");
        assert_eq!(grid.month, 3);

        let first_row: Vec<_> = grid.rows().next().unwrap().to_vec();
        assert_eq!(first_row[0].date, date(2024, 2, 26));
        assert!(!first_row[0].in_current_month);
        assert_eq!(first_row[3].date, date(2024, 2, 29));
        assert_eq!(first_row[4].date, date(2024, 3, 1));
        assert!(first_row[4].in_current_month);

        // February's task sits in a leading cell but is not shown there.
        assert!(first_row[2].tasks.is_empty());
        assert_eq!(first_row[4].tasks.len(), 1);
        assert_eq!(grid.cells.last().unwrap().date, date(2024, 4, 7));
    }

    #[test]
    fn test_all_view_groups_by_first_seen_tag() {
        let mut a = task("a", date(2024, 6, 10), 0);
        a.tag = "Study".to_string();
        let b = task("b", date(2024, 6, 11), 5);
        let c = task("c", date(2024, 6, 12), 3);

        let view = build_view(&[a, b, c], ViewMode::All, date(2024, 6, 10), TaskOrder::CreatedDesc);
        let View::All { groups } = view else {
            panic!("expected all view");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].tag, "Work");
        let ids: Vec<_> = groups[0].tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(groups[1].tag, "Study");
    }

    #[test]
    fn test_due_order_puts_untimed_tasks_first() {
        let mut timed = task("timed", date(2024, 6, 10), 0);
        timed.due_time = NaiveTime::from_hms_opt(8, 0, 0);
        let untimed = task("untimed", date(2024, 6, 10), 1);
        let later = task("later", date(2024, 6, 9), 2);

        let mut tasks = vec![timed, untimed, later];
        sort_tasks(&mut tasks, TaskOrder::DueAsc);
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["later", "untimed", "timed"]);
    }

    #[test]
    fn test_filter_does_not_mutate_input() {
        let tasks = vec![task("a", date(2024, 6, 10), 0), task("b", date(2024, 7, 1), 1)];
        let before = tasks.clone();
        let month = filter_tasks(&tasks, ViewMode::Month, date(2024, 6, 1));
        assert_eq!(month.len(), 1);
        assert_eq!(tasks, before);
        assert!(filter_tasks(&tasks, ViewMode::Day, date(2024, 6, 11)).is_empty());
    }
}

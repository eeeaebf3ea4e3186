//! Daily-journal TODO carry-over for Markdown notes.
//!
//! The core is pure: locate the TODO section, parse it into a forest of day
//! sections, split that forest into completed and open views, tag completions,
//! and render both views back into the same line format. Templates, front
//! matter and configuration sit around that core and are only touched by the
//! `process` module and the CLI.

pub mod model {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use std::fmt::Write;

    /// `strftime` pattern used for every date written into a journal.
    pub const ISO_DATE: &str = "%Y-%m-%d";

    /* ------------------------------ Entities ------------------------------ */

    /// One checkbox line and everything nested beneath it.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TodoItem {
        /// `[x]` when true, `[ ]` otherwise. Reflects only this line's marker.
        pub completed: bool,

        /// Content after the checkbox marker (may already end in a `#YYYY-MM-DD` tag).
        pub text: String,

        /// Checkbox lines indented deeper than this one, in document order.
        #[serde(default)]
        pub sub_items: Vec<TodoItem>,

        /// Non-checkbox lines owned by this item, indented one level deeper than the
        /// item's rendered checkbox. Indentation past that level is kept.
        #[serde(default)]
        pub bullet_lines: Vec<String>,
    }

    impl TodoItem {
        pub fn new(completed: bool, text: impl Into<String>) -> Self {
            Self {
                completed,
                text: text.into(),
                sub_items: vec![],
                bullet_lines: vec![],
            }
        }

        /// True when this item and every transitive sub-item is checked.
        pub fn is_fully_done(&self) -> bool {
            self.completed && self.sub_items.iter().all(TodoItem::is_fully_done)
        }

        /// Copy of this item with its bullet lines but none of its sub-items.
        pub fn stub(&self) -> Self {
            Self {
                completed: self.completed,
                text: self.text.clone(),
                sub_items: vec![],
                bullet_lines: self.bullet_lines.clone(),
            }
        }
    }

    /// A `- [[YYYY-MM-DD]]` header and the items nested under it.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DaySection {
        pub date: NaiveDate,
        #[serde(default)]
        pub items: Vec<TodoItem>,
    }

    impl DaySection {
        pub fn new(date: NaiveDate) -> Self {
            Self { date, items: vec![] }
        }
    }

    /// The parsed TODO section: day sections in document order.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TodoJournal {
        #[serde(default)]
        pub days: Vec<DaySection>,
    }

    impl TodoJournal {
        pub fn is_empty(&self) -> bool {
            self.days.is_empty()
        }

        /// Count items at any depth that satisfy `pred`.
        pub fn count_where(&self, pred: impl Fn(&TodoItem) -> bool) -> usize {
            fn rec(items: &[TodoItem], pred: &dyn Fn(&TodoItem) -> bool) -> usize {
                items
                    .iter()
                    .map(|item| usize::from(pred(item)) + rec(&item.sub_items, pred))
                    .sum()
            }
            self.days.iter().map(|day| rec(&day.items, &pred)).sum()
        }
    }

    /// Format `date` with a user-supplied pattern, `None` if the pattern is invalid.
    pub fn format_date(date: NaiveDate, pattern: &str) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", date.format(pattern)).ok()?;
        Some(out)
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum JournalError {
        #[error("section header {header:?} not found in document")]
        SectionNotFound { header: String },
        #[error("section {header:?} has no blank line after its header")]
        MalformedSection { header: String },
        #[error("invalid day header date on line {line}: {text:?}")]
        InvalidDate { line: usize, text: String },
    }

    impl JournalError {
        /// Shift a section-relative line number so it counts from `first_line` of the document.
        pub fn rebase(self, first_line: usize) -> Self {
            match self {
                JournalError::InvalidDate { line, text } => JournalError::InvalidDate {
                    line: line + first_line.saturating_sub(1),
                    text,
                },
                other => other,
            }
        }
    }

}

pub mod section {
    //! Locates the TODO section inside a full document by header text and
    //! blank-line boundaries. Pure string slicing; nothing is copied.

    use crate::model::JournalError;

    /// Three disjoint spans of a document around its TODO section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Section<'a> {
        /// Document up to and including the blank line after the header.
        pub prefix: &'a str,
        /// Section content, trimmed of surrounding whitespace.
        pub body: &'a str,
        /// From the next `## ` heading to the end; empty when no heading follows.
        pub suffix: &'a str,
        /// 1-based document line on which `body` starts.
        pub body_line: usize,
    }

    impl Section<'_> {
        /// Rebuild the document with `body` in place of the section content.
        pub fn replace_body(&self, body: &str) -> String {
            let mut out = String::with_capacity(self.prefix.len() + body.len() + self.suffix.len() + 2);
            out.push_str(self.prefix);
            out.push_str(body);
            if self.suffix.is_empty() {
                out.push('\n');
            } else {
                out.push_str("\n\n");
                out.push_str(self.suffix);
            }
            out
        }
    }

    /// Split `document` around the first occurrence of `header`.
    pub fn extract_section<'a>(document: &'a str, header: &str) -> Result<Section<'a>, JournalError> {
        let start = document
            .find(header)
            .ok_or_else(|| JournalError::SectionNotFound {
                header: header.to_string(),
            })?;
        let after_header = start + header.len();
        let blank = document[after_header..]
            .find("\n\n")
            .ok_or_else(|| JournalError::MalformedSection {
                header: header.to_string(),
            })?;

        let (prefix, rest) = document.split_at(after_header + blank + 2);
        let (raw_body, suffix) = if rest.starts_with("## ") {
            ("", rest)
        } else {
            match rest.find("\n\n## ") {
                Some(pos) => (&rest[..pos], &rest[pos + 2..]),
                None => (rest, ""),
            }
        };

        let leading = raw_body.len() - raw_body.trim_start().len();
        let body_line = prefix.matches('\n').count() + raw_body[..leading].matches('\n').count() + 1;

        Ok(Section {
            prefix,
            body: raw_body.trim(),
            suffix,
            body_line,
        })
    }

}

pub mod parser {
    //! Indentation-driven parser for the TODO section body.
    //!
    //! Parsing strategy:
    //! - Each line is classified with `nom` combinators (day header, checkbox item),
    //!   anything else indented or `-`-prefixed is a bullet line.
    //! - The item tree is stack-built by indentation width in a single pass; an
    //!   item is attached to its parent when it is popped off the stack.

    use crate::model::*;
    use chrono::NaiveDate;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while_m_n, take_while1},
        character::complete::{char, space0},
        combinator::{all_consuming, eof, map_res, rest, value},
        error::VerboseError,
        sequence::{delimited, preceded, terminated, tuple},
    };
    use tracing::debug;

    /// Columns a tab counts for when measuring indentation.
    const TAB_WIDTH: usize = 2;

    /// Columns per nesting level in rendered output.
    const BULLET_STEP: usize = 2;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------ Public entry points ------------------------ */

    /// Parse a section body into a journal. Line numbers in errors are 1-based
    /// relative to `body`.
    pub fn parse_journal(body: &str) -> Result<TodoJournal, JournalError> {
        let mut state = ParseState::default();
        for (idx, line) in body.lines().enumerate() {
            state.push_line(idx + 1, line)?;
        }
        let journal = state.finish();
        debug!(days = journal.days.len(), "parsed todo section");
        Ok(journal)
    }

    /// Parse an exact `YYYY-MM-DD` calendar date.
    pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
        all_consuming(parse_date)(s).ok().map(|(_, date)| date)
    }

    /* ---------------------------- Tree builder ---------------------------- */

    struct OpenItem {
        indent: usize,
        item: TodoItem,
    }

    #[derive(Default)]
    struct ParseState {
        journal: TodoJournal,
        current_day: Option<DaySection>,
        stack: Vec<OpenItem>,
    }

    impl ParseState {
        fn push_line(&mut self, line_no: usize, line: &str) -> Result<(), JournalError> {
            if let Ok((_, raw)) = day_header(line) {
                let date = parse_iso_date(raw).ok_or_else(|| JournalError::InvalidDate {
                    line: line_no,
                    text: line.to_string(),
                })?;
                self.close_day();
                self.current_day = Some(DaySection::new(date));
                return Ok(());
            }
            if line.trim().is_empty() || self.current_day.is_none() {
                return Ok(());
            }
            if let Ok((_, (indent, completed, text))) = todo_line(line) {
                self.push_item(indent_width(indent), TodoItem::new(completed, text));
            } else if line.starts_with(['-', ' ', '\t']) {
                self.attach_bullet(line);
            }
            Ok(())
        }

        fn push_item(&mut self, indent: usize, item: TodoItem) {
            while self.stack.last().is_some_and(|top| top.indent >= indent) {
                self.pop_item();
            }
            self.stack.push(OpenItem { indent, item });
        }

        fn pop_item(&mut self) {
            let Some(open) = self.stack.pop() else {
                return;
            };
            match self.stack.last_mut() {
                Some(parent) => parent.item.sub_items.push(open.item),
                None => {
                    if let Some(day) = self.current_day.as_mut() {
                        day.items.push(open.item);
                    }
                }
            }
        }

        /// Attach to the nearest item indented strictly less than the line,
        /// falling back to the innermost open item.
        ///
        /// The line is re-indented relative to its owner: stack slot `idx` renders
        /// at depth `idx + 1`, so the bullet lands at depth `idx + 2` plus whatever
        /// it had beyond one level under the owner.
        fn attach_bullet(&mut self, line: &str) {
            let ws = leading_whitespace(line);
            let indent = indent_width(ws);
            let target = self
                .stack
                .iter()
                .rposition(|open| open.indent < indent)
                .or_else(|| self.stack.len().checked_sub(1));
            let Some(idx) = target else {
                return;
            };

            let owner = &mut self.stack[idx];
            let extra = indent.saturating_sub(owner.indent + BULLET_STEP);
            let width = (idx + 2) * BULLET_STEP + extra;
            owner
                .item
                .bullet_lines
                .push(format!("{}{}", " ".repeat(width), &line[ws.len()..]));
        }

        fn close_day(&mut self) {
            while !self.stack.is_empty() {
                self.pop_item();
            }
            if let Some(day) = self.current_day.take() {
                self.journal.days.push(day);
            }
        }

        fn finish(mut self) -> TodoJournal {
            self.close_day();
            self.journal
        }
    }

    /* ------------------------------- Utils ------------------------------- */

    fn leading_whitespace(line: &str) -> &str {
        let body = line.trim_start_matches([' ', '\t']);
        &line[..line.len() - body.len()]
    }

    fn indent_width(ws: &str) -> usize {
        ws.chars()
            .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
            .sum()
    }

    /* ---------------------------- Line shapes ---------------------------- */

    /// `- [[<date-ish>]]` at column zero; yields the bracket content.
    fn day_header(i: &str) -> PResult<'_, &str> {
        terminated(
            delimited(
                tag("- [["),
                take_while1(|c: char| c.is_ascii_digit() || c == '-'),
                tag("]]"),
            ),
            tuple((space0, eof)),
        )(i)
    }

    /// `<indent>- [ ] text` or `<indent>- [x] text`.
    fn todo_line(i: &str) -> PResult<'_, (&str, bool, &str)> {
        tuple((
            space0,
            delimited(
                tag("- ["),
                alt((value(false, char(' ')), value(true, char('x')))),
                char(']'),
            ),
            alt((preceded(char(' '), rest), eof)),
        ))(i)
    }

    fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
                    s.parse::<i32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

}

pub mod split {
    //! Partition a journal into a completed view and an open view.
    //!
    //! - A fully done item moves to the completed side whole.
    //! - An unchecked item stays on the open side whole, done sub-items included,
    //!   so they can be tagged in place.
    //! - A checked item with open descendants is split: the open side keeps a stub
    //!   with the open parts, the completed side gets a stub holding only the
    //!   fully done parts (omitted when there are none).

    use crate::model::*;
    use tracing::debug;

    /// Returns `(completed, open)`. Day sections left without items are dropped.
    pub fn split_journal(journal: &TodoJournal) -> (TodoJournal, TodoJournal) {
        let mut completed = TodoJournal::default();
        let mut open = TodoJournal::default();

        for day in &journal.days {
            let mut done_day = DaySection::new(day.date);
            let mut open_day = DaySection::new(day.date);
            for item in &day.items {
                let parts = split_item(item);
                done_day.items.extend(parts.completed);
                open_day.items.extend(parts.open);
            }
            if !done_day.items.is_empty() {
                completed.days.push(done_day);
            }
            if !open_day.items.is_empty() {
                open.days.push(open_day);
            }
        }

        debug!(
            completed_days = completed.days.len(),
            open_days = open.days.len(),
            "split journal"
        );
        (completed, open)
    }

    #[derive(Debug, Default)]
    struct SplitParts {
        completed: Option<TodoItem>,
        open: Option<TodoItem>,
    }

    fn split_item(item: &TodoItem) -> SplitParts {
        if item.is_fully_done() {
            return SplitParts {
                completed: Some(item.clone()),
                open: None,
            };
        }
        if !item.completed {
            return SplitParts {
                completed: None,
                open: Some(item.clone()),
            };
        }

        let mut done = item.stub();
        let mut open = item.stub();
        for sub in &item.sub_items {
            let parts = split_item(sub);
            done.sub_items.extend(parts.completed);
            open.sub_items.extend(parts.open);
        }

        SplitParts {
            completed: (!done.sub_items.is_empty()).then_some(done),
            open: Some(open),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_journal;

        fn texts(items: &[TodoItem]) -> Vec<&str> {
            items.iter().map(|i| i.text.as_str()).collect()
        }

        fn leaves(items: &[TodoItem], out: &mut Vec<String>) {
            for item in items {
                if item.sub_items.is_empty() {
                    out.push(item.text.clone());
                } else {
                    leaves(&item.sub_items, out);
                }
            }
        }

        fn journal_leaves(journal: &TodoJournal) -> Vec<String> {
            let mut out = Vec::new();
            for day in &journal.days {
                leaves(&day.items, &mut out);
            }
            out.sort();
            out
        }

        #[test]
        fn top_level_items_split_by_completion() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [ ] An unfinished todo\n  - [x] A completed todo",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            assert_eq!(texts(&completed.days[0].items), vec!["A completed todo"]);
            assert_eq!(texts(&open.days[0].items), vec!["An unfinished todo"]);
        }

        #[test]
        fn done_subtask_under_unchecked_parent_stays_open() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [ ] Unfinished 2\n    - [x] Completed subtask\n    - [ ] Uncompleted subtask",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            assert!(completed.is_empty());
            let parent = &open.days[0].items[0];
            assert_eq!(parent.text, "Unfinished 2");
            assert_eq!(
                texts(&parent.sub_items),
                vec!["Completed subtask", "Uncompleted subtask"]
            );
        }

        #[test]
        fn checked_parent_with_open_child_is_split_across_both_sides() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [x] Parent\n    - context line\n    - [x] done child\n    - [ ] open child\n      - [x] done grandchild",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            let done_parent = &completed.days[0].items[0];
            assert_eq!(done_parent.text, "Parent");
            assert_eq!(texts(&done_parent.sub_items), vec!["done child"]);
            assert_eq!(done_parent.bullet_lines, vec!["    - context line".to_string()]);

            let open_parent = &open.days[0].items[0];
            assert_eq!(texts(&open_parent.sub_items), vec!["open child"]);
            assert_eq!(open_parent.bullet_lines, done_parent.bullet_lines);
            assert_eq!(
                texts(&open_parent.sub_items[0].sub_items),
                vec!["done grandchild"]
            );
        }

        #[test]
        fn checked_parent_without_done_children_only_appears_open() {
            let journal =
                parse_journal("- [[2025-05-12]]\n  - [x] Parent\n    - [ ] still open").expect("parse");
            let (completed, open) = split_journal(&journal);

            assert!(completed.is_empty());
            assert_eq!(texts(&open.days[0].items), vec!["Parent"]);
        }

        #[test]
        fn nested_split_keeps_the_checked_chain() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [x] a\n    - [x] b\n      - [x] c\n      - [ ] d",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            let a = &completed.days[0].items[0];
            assert_eq!(a.sub_items[0].text, "b");
            assert_eq!(texts(&a.sub_items[0].sub_items), vec!["c"]);

            let a = &open.days[0].items[0];
            assert_eq!(texts(&a.sub_items[0].sub_items), vec!["d"]);
        }

        #[test]
        fn empty_days_are_omitted_per_side() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [x] done\n- [[2025-05-11]]\n  - [ ] open",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            assert_eq!(completed.days.len(), 1);
            assert_eq!(completed.days[0].date.to_string(), "2025-05-12");
            assert_eq!(open.days.len(), 1);
            assert_eq!(open.days[0].date.to_string(), "2025-05-11");
        }

        #[test]
        fn fully_done_items_never_reach_the_open_side() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [x] all done\n    - [x] really\n  - [ ] not done\n    - [ ] at all",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            for item in &completed.days[0].items {
                assert!(item.is_fully_done());
            }
            for item in &open.days[0].items {
                assert!(!item.is_fully_done());
            }
        }

        #[test]
        fn leaves_are_conserved() {
            let journal = parse_journal(
                "- [[2025-05-12]]\n  - [x] p\n    - [x] q\n    - [ ] r\n      - [x] s\n  - [ ] t\n    - [x] u\n- [[2025-05-11]]\n  - [x] v",
            )
            .expect("parse");
            let (completed, open) = split_journal(&journal);

            let mut both = journal_leaves(&completed);
            both.extend(journal_leaves(&open));
            both.sort();
            assert_eq!(both, journal_leaves(&journal));
        }
    }
}

pub mod tag {
    //! Completion-date tagging. The "already tagged" check is shape-based: any
    //! `#YYYY-MM-DD` in the text blocks a new tag, whatever its date.

    use crate::model::*;
    use chrono::NaiveDate;
    use once_cell::sync::Lazy;
    use regex::Regex;

    static DATE_TAG_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"#\d{4}-\d{2}-\d{2}").expect("valid date tag regex"));

    pub fn has_date_tag(text: &str) -> bool {
        DATE_TAG_RE.is_match(text)
    }

    /// Append ` #<date>` to every checked, untagged item at any depth.
    /// Returns how many items were tagged.
    pub fn tag_completed(journal: &mut TodoJournal, date: NaiveDate) -> usize {
        let suffix = format!(" #{}", date.format(ISO_DATE));
        journal
            .days
            .iter_mut()
            .map(|day| tag_items(&mut day.items, &suffix))
            .sum()
    }

    fn tag_items(items: &mut [TodoItem], suffix: &str) -> usize {
        let mut tagged = 0;
        for item in items {
            if item.completed && !has_date_tag(&item.text) {
                item.text.push_str(suffix);
                tagged += 1;
            }
            tagged += tag_items(&mut item.sub_items, suffix);
        }
        tagged
    }

}

pub mod format {
    //! Serializer for the TODO section; the structural inverse of `parser`.

    use crate::model::*;

    const INDENT: &str = "  ";

    /// Render `journal` in compact form: no blank lines between days, items
    /// indented two spaces per depth, no trailing newline.
    pub fn format_journal(journal: &TodoJournal) -> String {
        let mut out = String::new();
        for day in &journal.days {
            out.push_str("- [[");
            out.push_str(&day.date.format(ISO_DATE).to_string());
            out.push_str("]]\n");
            for item in &day.items {
                format_item(&mut out, item, 1);
            }
        }
        let end = out.trim_end_matches('\n').len();
        out.truncate(end);
        out
    }

    fn format_item(out: &mut String, item: &TodoItem, depth: usize) {
        out.push_str(&INDENT.repeat(depth));
        out.push_str(if item.completed { "- [x] " } else { "- [ ] " });
        out.push_str(&item.text);
        out.push('\n');
        for line in &item.bullet_lines {
            out.push_str(line);
            out.push('\n');
        }
        for sub in &item.sub_items {
            format_item(out, sub, depth + 1);
        }
    }

}

pub mod frontmatter {
    //! Reads a date out of a `---` delimited front-matter block. Only flat
    //! `key: value` lines are understood; nested YAML is ignored.

    use crate::parser::parse_iso_date;
    use chrono::NaiveDate;
    use once_cell::sync::Lazy;
    use regex::Regex;

    static DATE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid date regex"));

    const DELIMITER: &str = "---";

    /// Lines between the opening and closing `---`, or `None` without a closed block.
    pub fn front_matter_lines(document: &str) -> Option<Vec<&str>> {
        let mut lines = document.lines();
        if lines.next()?.trim_end() != DELIMITER {
            return None;
        }
        let mut block = Vec::new();
        for line in lines {
            if line.trim_end() == DELIMITER {
                return Some(block);
            }
            block.push(line);
        }
        None
    }

    /// First `YYYY-MM-DD` date in the value of `key`, if any.
    pub fn extract_date(document: &str, key: &str) -> Option<NaiveDate> {
        let value = front_matter_lines(document)?.into_iter().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then_some(v)
        })?;
        DATE_RE
            .find_iter(value)
            .find_map(|m| parse_iso_date(m.as_str()))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn reads_date_from_key() {
            let doc = "---\ntags: daily\ntitle: 2025-05-13\n---\n\n## Todos\n";
            assert_eq!(
                extract_date(doc, "title"),
                NaiveDate::from_ymd_opt(2025, 5, 13)
            );
        }

        #[test]
        fn date_may_be_embedded_in_value() {
            let doc = "---\ntitle: \"Tuesday 2025-05-13 (week 20)\"\n---\n";
            assert_eq!(
                extract_date(doc, "title"),
                NaiveDate::from_ymd_opt(2025, 5, 13)
            );
        }

        #[test]
        fn missing_block_key_or_date_yields_none() {
            assert_eq!(extract_date("## Todos\n\n", "title"), None);
            assert_eq!(extract_date("---\ndate: 2025-05-13\n---\n", "title"), None);
            assert_eq!(extract_date("---\ntitle: Someday\n---\n", "title"), None);
            assert_eq!(extract_date("---\ntitle: 2025-02-30\n---\n", "title"), None);
            assert_eq!(extract_date("---\ntitle: 2025-05-13\n", "title"), None);
        }

        #[test]
        fn only_the_front_matter_block_is_searched() {
            let doc = "---\nauthor: me\n---\ntitle: 2025-05-13\n";
            assert_eq!(extract_date(doc, "title"), None);
        }
    }
}

pub mod template {
    //! Template rendering for the new journal file, on top of `minijinja`.
    //!
    //! The template is compiled and custom variable names are validated when a
    //! [`Generator`] is built, so a bad template fails before any file is read.

    use crate::model::{ISO_DATE, format_date as format_with};
    use crate::parser::parse_iso_date;
    use chrono::{Datelike, NaiveDate, TimeDelta};
    use indexmap::IndexMap;
    use minijinja::{Environment, ErrorKind, Value};
    use once_cell::sync::Lazy;
    use rand::seq::SliceRandom;
    use regex::Regex;
    use serde::{Deserialize, Serialize};

    /// Used when no template file is configured.
    pub const DEFAULT_TEMPLATE: &str = "---\ntitle: {{ DATE }}\n---\n\n## Todos\n\n{{ TODOS }}\n";

    /// Names the generator always defines; custom variables may not reuse them.
    pub const BUILTIN_VARIABLES: &[&str] = &[
        "TODOS",
        "DATE",
        "PREVIOUS_DATE",
        "YEAR",
        "MONTH",
        "DAY",
        "WEEKDAY",
        "OPEN_COUNT",
        "COMPLETED_COUNT",
    ];

    const TEMPLATE_NAME: &str = "journal.md";

    static IDENTIFIER_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

    #[derive(Debug, thiserror::Error)]
    pub enum TemplateError {
        #[error("template syntax error: {0}")]
        Syntax(#[source] minijinja::Error),
        #[error("template rendering failed: {0}")]
        Render(#[source] minijinja::Error),
        #[error("custom variable {0:?} is not a valid identifier")]
        InvalidVariableName(String),
        #[error("custom variable {0:?} collides with a built-in variable")]
        ReservedVariable(String),
    }

    /// A user-defined template variable as written in `config.toml`.
    ///
    /// Arrays must be homogeneous; a mixed array matches no variant.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum CustomValue {
        Boolean(bool),
        Integer(i64),
        Float(f64),
        String(String),
        BooleanArray(Vec<bool>),
        IntegerArray(Vec<i64>),
        FloatArray(Vec<f64>),
        StringArray(Vec<String>),
    }

    impl CustomValue {
        fn to_value(&self) -> Value {
            match self {
                CustomValue::Boolean(b) => Value::from(*b),
                CustomValue::Integer(n) => Value::from(*n),
                CustomValue::Float(f) => Value::from(*f),
                CustomValue::String(s) => Value::from(s.clone()),
                CustomValue::BooleanArray(xs) => Value::from(xs.clone()),
                CustomValue::IntegerArray(xs) => Value::from(xs.clone()),
                CustomValue::FloatArray(xs) => Value::from(xs.clone()),
                CustomValue::StringArray(xs) => Value::from(xs.clone()),
            }
        }
    }

    /// Values computed for one run.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TemplateVars {
        /// Serialized open forest.
        pub todos: String,
        /// Date of the file being generated.
        pub date: NaiveDate,
        /// Date of the journal the todos were carried from.
        pub previous_date: NaiveDate,
        pub open_count: usize,
        pub completed_count: usize,
    }

    impl TemplateVars {
        fn builtins(&self) -> [(&'static str, Value); 9] {
            [
                ("TODOS", Value::from(self.todos.clone())),
                ("DATE", Value::from(self.date.format(ISO_DATE).to_string())),
                (
                    "PREVIOUS_DATE",
                    Value::from(self.previous_date.format(ISO_DATE).to_string()),
                ),
                ("YEAR", Value::from(self.date.year())),
                ("MONTH", Value::from(self.date.month())),
                ("DAY", Value::from(self.date.day())),
                ("WEEKDAY", Value::from(self.date.format("%A").to_string())),
                ("OPEN_COUNT", Value::from(self.open_count as u64)),
                ("COMPLETED_COUNT", Value::from(self.completed_count as u64)),
            ]
        }
    }

    pub fn validate_variable_name(name: &str) -> Result<(), TemplateError> {
        if !IDENTIFIER_RE.is_match(name) {
            return Err(TemplateError::InvalidVariableName(name.to_string()));
        }
        if BUILTIN_VARIABLES.contains(&name) {
            return Err(TemplateError::ReservedVariable(name.to_string()));
        }
        Ok(())
    }

    /// A compiled template plus the custom variables it renders with.
    pub struct Generator {
        env: Environment<'static>,
        custom: IndexMap<String, CustomValue>,
    }

    impl std::fmt::Debug for Generator {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Generator")
                .field("custom", &self.custom)
                .finish_non_exhaustive()
        }
    }

    impl Generator {
        pub fn new(
            template: impl Into<String>,
            custom: IndexMap<String, CustomValue>,
        ) -> Result<Self, TemplateError> {
            for name in custom.keys() {
                validate_variable_name(name)?;
            }

            let mut env = Environment::new();
            env.set_keep_trailing_newline(true);
            env.add_function("add_days", add_days);
            env.add_function("format_date", format_date);
            env.add_function("weekday", weekday);
            env.add_filter("shuffle", shuffle);
            env.add_template_owned(TEMPLATE_NAME, template.into())
                .map_err(TemplateError::Syntax)?;

            Ok(Self { env, custom })
        }

        pub fn render(&self, vars: &TemplateVars) -> Result<String, TemplateError> {
            let mut ctx: IndexMap<String, Value> = self
                .custom
                .iter()
                .map(|(name, value)| (name.clone(), value.to_value()))
                .collect();
            for (name, value) in vars.builtins() {
                ctx.insert(name.to_string(), value);
            }

            let template = self
                .env
                .get_template(TEMPLATE_NAME)
                .map_err(TemplateError::Render)?;
            template.render(&ctx).map_err(TemplateError::Render)
        }
    }

    /* --------------------------- Function library --------------------------- */

    fn date_arg(raw: &str) -> Result<NaiveDate, minijinja::Error> {
        parse_iso_date(raw).ok_or_else(|| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("{raw:?} is not a YYYY-MM-DD date"),
            )
        })
    }

    fn add_days(date: String, days: i64) -> Result<String, minijinja::Error> {
        let date = date_arg(&date)?;
        TimeDelta::try_days(days)
            .and_then(|delta| date.checked_add_signed(delta))
            .map(|d| d.format(ISO_DATE).to_string())
            .ok_or_else(|| {
                minijinja::Error::new(ErrorKind::InvalidOperation, "date out of range")
            })
    }

    fn format_date(date: String, pattern: String) -> Result<String, minijinja::Error> {
        let date = date_arg(&date)?;
        format_with(date, &pattern).ok_or_else(|| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid date format {pattern:?}"),
            )
        })
    }

    fn weekday(date: String) -> Result<String, minijinja::Error> {
        Ok(date_arg(&date)?.format("%A").to_string())
    }

    fn shuffle(mut items: Vec<Value>) -> Vec<Value> {
        items.shuffle(&mut rand::rng());
        items
    }

}

pub mod config {
    //! `config.toml` loading.
    //!
    //! Precedence is flag > environment > file > default. Flags and environment
    //! variables are resolved together by the CLI (clap `env`) and layered on top
    //! of the file with [`Config::apply`].

    use crate::template::{CustomValue, DEFAULT_TEMPLATE};
    use anyhow::{Context, Result};
    use directories::BaseDirs;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{
        env, fs,
        path::{Path, PathBuf},
    };
    use tracing::debug;

    pub const DEFAULT_SECTION_HEADER: &str = "## Todos";
    pub const DEFAULT_DATE_KEY: &str = "title";
    pub const DEFAULT_FILE_NAME: &str = "%Y-%m-%d.md";
    pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Config {
        /// Template file for new journals; the built-in template when unset.
        pub template: Option<PathBuf>,
        /// Where new journals go; the processed journal's directory when unset.
        pub output_dir: Option<PathBuf>,
        pub section_header: String,
        /// Front-matter key holding the journal's date.
        pub date_key: String,
        /// `strftime` pattern for new file names.
        pub file_name: String,
        pub backup: bool,
        pub backup_suffix: String,
        /// Custom template variables.
        pub variables: IndexMap<String, CustomValue>,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                template: None,
                output_dir: None,
                section_header: DEFAULT_SECTION_HEADER.to_string(),
                date_key: DEFAULT_DATE_KEY.to_string(),
                file_name: DEFAULT_FILE_NAME.to_string(),
                backup: true,
                backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
                variables: IndexMap::new(),
            }
        }
    }

    /// Settings given on the command line or through the environment.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Overrides {
        pub template: Option<PathBuf>,
        pub output_dir: Option<PathBuf>,
        pub section_header: Option<String>,
        pub date_key: Option<String>,
        pub no_backup: bool,
    }

    impl Config {
        pub fn from_toml_str(text: &str) -> Result<Self> {
            toml::from_str(text).context("parsing config TOML")
        }

        /// Load from `explicit`, or from the default location if it exists.
        /// An explicitly named file must exist.
        pub fn load(explicit: Option<&Path>) -> Result<Self> {
            let path = match explicit {
                Some(path) => expand_home(path),
                None => match default_config_path() {
                    Some(path) if path.exists() => path,
                    _ => {
                        debug!("no config file found; using defaults");
                        return Ok(Self::default());
                    }
                },
            };
            debug!(path = %path.display(), "loading config");
            let text =
                fs::read_to_string(&path).with_context(|| format!("reading config {:?}", path))?;
            Self::from_toml_str(&text).with_context(|| format!("loading config {:?}", path))
        }

        pub fn apply(&mut self, overrides: Overrides) {
            if let Some(template) = overrides.template {
                self.template = Some(template);
            }
            if let Some(dir) = overrides.output_dir {
                self.output_dir = Some(dir);
            }
            if let Some(header) = overrides.section_header {
                self.section_header = header;
            }
            if let Some(key) = overrides.date_key {
                self.date_key = key;
            }
            if overrides.no_backup {
                self.backup = false;
            }
        }

        /// Template source: the configured file, or [`DEFAULT_TEMPLATE`].
        pub fn template_text(&self) -> Result<String> {
            match &self.template {
                Some(path) => {
                    let path = expand_home(path);
                    fs::read_to_string(&path)
                        .with_context(|| format!("reading template {:?}", path))
                }
                None => Ok(DEFAULT_TEMPLATE.to_string()),
            }
        }
    }

    /// `$XDG_CONFIG_HOME/daybook/config.toml`, else `~/.config/daybook/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("daybook").join("config.toml"));
        }
        BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join("daybook").join("config.toml"))
    }

    /// Expand a leading `~/` to the home directory.
    pub fn expand_home(path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(dirs) = BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        path.to_path_buf()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn empty_file_yields_defaults() {
            let config = Config::from_toml_str("").expect("parse");
            assert_eq!(config, Config::default());
            assert_eq!(config.section_header, "## Todos");
            assert!(config.backup);
        }

        #[test]
        fn full_file_with_typed_variables() {
            let config = Config::from_toml_str(
                r###"
template = "/notes/template.md"
output_dir = "/notes/daily"
section_header = "## Tasks"
date_key = "date"
file_name = "%Y/%m/%Y-%m-%d.md"
backup = false

[variables]
author = "sam"
streak = 12
ratio = 0.5
public = false
quotes = ["one", "two"]
weights = [1, 2, 3]
"###,
            )
            .expect("parse");

            assert_eq!(config.template, Some(PathBuf::from("/notes/template.md")));
            assert_eq!(config.section_header, "## Tasks");
            assert_eq!(config.date_key, "date");
            assert!(!config.backup);
            assert_eq!(config.backup_suffix, ".bak");

            let names: Vec<&str> = config.variables.keys().map(String::as_str).collect();
            assert_eq!(names, vec!["author", "streak", "ratio", "public", "quotes", "weights"]);
            assert_eq!(config.variables["author"], CustomValue::String("sam".into()));
            assert_eq!(config.variables["streak"], CustomValue::Integer(12));
            assert_eq!(config.variables["ratio"], CustomValue::Float(0.5));
            assert_eq!(config.variables["public"], CustomValue::Boolean(false));
            assert_eq!(
                config.variables["quotes"],
                CustomValue::StringArray(vec!["one".into(), "two".into()])
            );
            assert_eq!(config.variables["weights"], CustomValue::IntegerArray(vec![1, 2, 3]));
        }

        #[test]
        fn mixed_arrays_and_unknown_keys_are_rejected() {
            assert!(Config::from_toml_str("[variables]\nmixed = [1, \"a\"]\n").is_err());
            assert!(Config::from_toml_str("colour = true\n").is_err());
        }

        #[test]
        fn overrides_win_over_file_values() {
            let mut config =
                Config::from_toml_str("section_header = \"## Tasks\"\ndate_key = \"date\"\n")
                    .expect("parse");
            config.apply(Overrides {
                section_header: Some("## Today".into()),
                no_backup: true,
                ..Overrides::default()
            });

            assert_eq!(config.section_header, "## Today");
            assert_eq!(config.date_key, "date");
            assert!(!config.backup);
        }

        #[test]
        fn explicit_missing_file_is_an_error() {
            let tmp = tempfile::tempdir().expect("tempdir");
            assert!(Config::load(Some(&tmp.path().join("nope.toml"))).is_err());
        }

        #[test]
        fn explicit_file_is_loaded() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("config.toml");
            fs::write(&path, "backup_suffix = \".orig\"\n").expect("write config");
            let config = Config::load(Some(&path)).expect("load");
            assert_eq!(config.backup_suffix, ".orig");
        }

        #[test]
        fn template_text_defaults_to_builtin() {
            assert_eq!(
                Config::default().template_text().expect("template"),
                DEFAULT_TEMPLATE
            );
        }

        #[test]
        fn absolute_paths_are_not_expanded() {
            assert_eq!(expand_home(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        }
    }
}

pub mod process {
    //! The carry-over pipeline: extract → parse → split → tag → render.

    use crate::format::format_journal;
    use crate::frontmatter::extract_date;
    use crate::model::*;
    use crate::parser::parse_journal;
    use crate::section::extract_section;
    use crate::split::split_journal;
    use crate::tag::tag_completed;
    use crate::template::{Generator, TemplateVars};
    use anyhow::Result;
    use chrono::NaiveDate;
    use tracing::{debug, warn};

    /// Result of processing one journal document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Processed {
        /// The original document with its section replaced by the completed items.
        pub updated_document: String,
        /// What replaced the section: rendered completed items or a "Moved to" note.
        pub completed_todos: String,
        /// Rendered open items, handed to the template as `TODOS`.
        pub open_todos: String,
        /// Unchecked items carried forward.
        pub open_count: usize,
        /// Checked items across both views.
        pub completed_count: usize,
    }

    /// Split the section under `header` into what stays in `document` and what
    /// moves forward to the journal dated `new_date`. Checked items are tagged
    /// with `original_date`.
    pub fn process(
        document: &str,
        header: &str,
        original_date: NaiveDate,
        new_date: NaiveDate,
    ) -> Result<Processed, JournalError> {
        let section = extract_section(document, header)?;
        let journal = parse_journal(section.body).map_err(|e| e.rebase(section.body_line))?;

        let (mut completed, mut open) = split_journal(&journal);
        let tagged =
            tag_completed(&mut completed, original_date) + tag_completed(&mut open, original_date);
        debug!(tagged, "tagged completed items");

        let completed_todos = if completed.is_empty() {
            format!("Moved to [[{}]]", new_date.format(ISO_DATE))
        } else {
            format_journal(&completed)
        };
        let open_todos = format_journal(&open);

        Ok(Processed {
            updated_document: section.replace_body(&completed_todos),
            open_count: open.count_where(|item| !item.completed),
            completed_count: completed.count_where(|item| item.completed)
                + open.count_where(|item| item.completed),
            completed_todos,
            open_todos,
        })
    }

    /// Settings for [`roll`].
    #[derive(Debug, Clone, Copy)]
    pub struct RollOptions<'a> {
        pub section_header: &'a str,
        pub date_key: &'a str,
        pub new_date: NaiveDate,
        /// Used as the original date when the front matter has none.
        pub today: NaiveDate,
    }

    /// Both documents produced by one roll-over; nothing is written yet.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Rollover {
        pub original_date: NaiveDate,
        pub updated_document: String,
        pub new_document: String,
    }

    /// Process `document` and render the new journal from `generator`.
    pub fn roll(document: &str, generator: &Generator, opts: &RollOptions<'_>) -> Result<Rollover> {
        let original_date = match extract_date(document, opts.date_key) {
            Some(date) => date,
            None => {
                warn!(
                    key = opts.date_key,
                    fallback = %opts.today,
                    "no front-matter date found; using today"
                );
                opts.today
            }
        };

        let processed = process(document, opts.section_header, original_date, opts.new_date)?;
        debug!(
            open = processed.open_count,
            completed = processed.completed_count,
            "processed journal"
        );

        let new_document = generator.render(&TemplateVars {
            todos: processed.open_todos,
            date: opts.new_date,
            previous_date: original_date,
            open_count: processed.open_count,
            completed_count: processed.completed_count,
        })?;

        Ok(Rollover {
            original_date,
            updated_document: processed.updated_document,
            new_document,
        })
    }

}

pub use format::format_journal;
pub use parser::parse_journal;
pub use process::{process, roll};
pub use section::extract_section;
pub use split::split_journal;
pub use tag::tag_completed;

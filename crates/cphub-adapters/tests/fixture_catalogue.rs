// Every live and meta source ships a recorded upstream response under fixtures/.

use chrono::{TimeZone, Utc};
use cphub_adapters::{parse_atcoder_upcoming, parse_clist, parse_codechef, parse_codeforces, parse_leetcode};

fn fixture(rel: &str) -> Vec<u8> {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    std::fs::read(root.join("fixtures").join(rel)).unwrap_or_else(|e| panic!("reading {rel}: {e}"))
}

#[test]
fn recorded_responses_parse_into_future_candidates() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
    let atcoder = String::from_utf8(fixture("atcoder/contests.html")).unwrap();

    let parsed = [
        ("codeforces", parse_codeforces(&fixture("codeforces/contest_list.json"), now, 10).unwrap()),
        ("codechef", parse_codechef(&fixture("codechef/contests.json"), now, 10).unwrap()),
        ("leetcode", parse_leetcode(&fixture("leetcode/upcoming.json"), now, 10).unwrap()),
        ("atcoder", parse_atcoder_upcoming(&atcoder, now, 10).unwrap()),
        ("clist", parse_clist(&fixture("clist/contests.json"), now, 30).unwrap()),
    ];

    for (source, drafts) in parsed {
        assert!(!drafts.is_empty(), "{source} fixture yielded nothing");
        for draft in &drafts {
            assert!(draft.validate(now).is_ok(), "{source} produced invalid {draft:?}");
        }
        assert!(
            drafts.windows(2).all(|w| w[0].start_time <= w[1].start_time),
            "{source} candidates are not ascending"
        );
    }
}

//! Integration tests: StateManager operations over an in-memory store.

use std::time::Duration;

use pulsestore_core::Config;
use pulsestore_state::{
    Cookie, CookieInfo, LiveInfo, LiveStatus, NewsInfo, StateError, StateManager, Store, UserInfo, UserStat,
};

const G1: i64 = 10001;
const G2: i64 = 10002;
const UID1: i64 = 1;
const UID2: i64 = 2;
const ROOMID1: i64 = 100;
const NAME1: &str = "A";
const DYNAMIC_ID1: i64 = 700_000_000_000_001;
const TIMESTAMP1: i64 = 1_600_000_000;
const TIMESTAMP2: i64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_state_manager() -> StateManager {
    let store = Store::open_in_memory(Config::ephemeral()).unwrap();
    let sm = StateManager::new(store);
    sm.fresh_index(&[G1, G2]).unwrap();
    sm.start().unwrap();
    sm
}

fn user1() -> UserInfo {
    UserInfo::new(UID1, ROOMID1, NAME1, "")
}

fn stored_entries(sm: &StateManager) -> usize {
    sm.store().engine().len()
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[test]
fn test_start_after_fresh_index() {
    let sm = init_state_manager();
    assert_eq!(sm.store().engine().indexes().len(), 5);
}

#[test]
fn test_user_info() {
    let sm = init_state_manager();
    let orig = user1();
    sm.add_user_info(Some(&orig)).unwrap();
    assert_eq!(sm.get_user_info(UID1).unwrap(), orig);

    assert!(sm.get_user_info(UID2).unwrap_err().is_not_found());
    assert!(matches!(sm.add_user_info(None), Err(StateError::MissingPayload(_))));
}

#[test]
fn test_live_info() {
    let sm = init_state_manager();
    let orig_user = user1();
    let orig_live = LiveInfo::new(orig_user.clone(), "", "", LiveStatus::Living);
    sm.add_live_info(Some(&orig_live)).unwrap();

    assert_eq!(sm.get_user_info(UID1).unwrap(), orig_user);
    assert_eq!(sm.get_live_info(UID1).unwrap(), orig_live);
    assert!(sm.get_live_info(UID2).unwrap_err().is_not_found());

    sm.delete_live_info(UID1).unwrap();
    assert!(sm.get_live_info(UID1).unwrap_err().is_not_found());
    assert_eq!(sm.get_user_info(UID1).unwrap(), orig_user);

    assert!(sm.delete_live_info(UID1).unwrap_err().is_not_found());
    assert!(sm.add_live_info(None).is_err());
}

#[test]
fn test_news_info() {
    let sm = init_state_manager();
    let orig_user = user1();
    let orig_news = NewsInfo::new(orig_user.clone(), DYNAMIC_ID1, TIMESTAMP1);
    sm.add_news_info(Some(&orig_news)).unwrap();

    assert_eq!(sm.get_user_info(UID1).unwrap(), orig_user);
    assert_eq!(sm.get_news_info(UID1).unwrap(), orig_news);
    assert!(sm.get_news_info(UID2).unwrap_err().is_not_found());

    sm.delete_news_info(UID1).unwrap();
    assert!(sm.get_news_info(UID1).unwrap_err().is_not_found());
    assert!(sm.add_news_info(None).is_err());
}

#[test]
fn test_later_news_replaces_earlier() {
    let sm = init_state_manager();
    sm.add_news_info(Some(&NewsInfo::new(user1(), 1, TIMESTAMP1))).unwrap();
    sm.add_news_info(Some(&NewsInfo::new(user1(), 2, TIMESTAMP2))).unwrap();
    let news = sm.get_news_info(UID1).unwrap();
    assert_eq!((news.dynamic_id, news.timestamp), (2, TIMESTAMP2));
}

#[test]
fn test_live_info_refreshes_user() {
    let sm = init_state_manager();
    sm.add_user_info(Some(&user1())).unwrap();
    let renamed = UserInfo::new(UID1, ROOMID1, "A2", "face.jpg");
    sm.add_live_info(Some(&LiveInfo::new(renamed.clone(), "t", "c", LiveStatus::NotLiving)))
        .unwrap();
    assert_eq!(sm.get_user_info(UID1).unwrap(), renamed);
}

#[test]
fn test_delete_news_and_live_info() {
    let sm = init_state_manager();
    let orig_user = user1();
    sm.add_live_info(Some(&LiveInfo::new(orig_user.clone(), "", "", LiveStatus::Living)))
        .unwrap();
    sm.add_news_info(Some(&NewsInfo::new(orig_user.clone(), DYNAMIC_ID1, TIMESTAMP1)))
        .unwrap();

    sm.delete_news_and_live_info(UID1).unwrap();
    assert!(sm.get_live_info(UID1).unwrap_err().is_not_found());
    assert!(sm.get_news_info(UID1).unwrap_err().is_not_found());
    assert_eq!(sm.get_user_info(UID1).unwrap(), orig_user);

    // nothing left to delete is fine
    sm.delete_news_and_live_info(UID1).unwrap();
}

#[test]
fn test_live_without_user_is_operational_error() {
    let sm = init_state_manager();
    sm.add_live_info(Some(&LiveInfo::new(user1(), "", "", LiveStatus::Living)))
        .unwrap();
    sm.store()
        .update(|tx| {
            use pulsestore_state::{StateKey, StateWrite};
            tx.remove(&StateKey::UserInfo { mid: UID1 });
            Ok(())
        })
        .unwrap();

    let err = sm.get_live_info(UID1).unwrap_err();
    assert!(matches!(err, StateError::MissingUser { mid: UID1 }));
    assert!(!err.is_not_found());
}

// ---------------------------------------------------------------------------
// Markers, counters, set-if-absent
// ---------------------------------------------------------------------------

#[test]
fn test_dynamic_id_marks() {
    let sm = init_state_manager();
    assert!(sm.check_dynamic_id(DYNAMIC_ID1).unwrap());

    assert!(!sm.mark_dynamic_id(DYNAMIC_ID1).unwrap());
    assert!(!sm.check_dynamic_id(DYNAMIC_ID1).unwrap());

    assert!(sm.mark_dynamic_id(DYNAMIC_ID1).unwrap());
    assert!(sm.check_dynamic_id(DYNAMIC_ID1 + 1).unwrap());
}

#[test]
fn test_inc_not_live_count() {
    let sm = init_state_manager();
    for expected in 1..=6 {
        assert_eq!(sm.inc_not_live_count(UID1).unwrap(), expected);
    }
    sm.clear_not_live_count(UID1).unwrap();
    assert_eq!(sm.inc_not_live_count(UID1).unwrap(), 1);
    assert_eq!(sm.inc_not_live_count(UID1).unwrap(), 2);
    assert_eq!(sm.inc_not_live_count(UID2).unwrap(), 1);
}

#[test]
fn test_inc_not_live_count_concurrent() {
    let sm = init_state_manager();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let sm = sm.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    sm.inc_not_live_count(UID1).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sm.inc_not_live_count(UID1).unwrap(), 201);
}

#[test]
fn test_uid_first_timestamp() {
    let sm = init_state_manager();
    assert!(sm.get_uid_first_timestamp(UID1).unwrap_err().is_not_found());

    sm.set_uid_first_timestamp_if_not_exist(UID1, TIMESTAMP1).unwrap();
    assert_eq!(sm.get_uid_first_timestamp(UID1).unwrap(), TIMESTAMP1);

    sm.set_uid_first_timestamp_if_not_exist(UID1, TIMESTAMP2).unwrap();
    assert_eq!(sm.get_uid_first_timestamp(UID1).unwrap(), TIMESTAMP1);

    sm.unset_uid_first_timestamp(UID1).unwrap();
    assert!(sm.get_uid_first_timestamp(UID1).unwrap_err().is_not_found());
}

#[test]
fn test_clear_by_mid() {
    let sm = init_state_manager();
    let orig_user = user1();
    sm.add_live_info(Some(&LiveInfo::new(orig_user.clone(), "", "", LiveStatus::Living)))
        .unwrap();
    sm.add_news_info(Some(&NewsInfo::new(orig_user, DYNAMIC_ID1, TIMESTAMP1)))
        .unwrap();
    sm.set_uid_first_timestamp_if_not_exist(UID1, TIMESTAMP1).unwrap();
    for _ in 0..4 {
        sm.inc_not_live_count(UID1).unwrap();
    }

    sm.clear_by_mid(UID1).unwrap();

    assert!(sm.get_user_info(UID1).unwrap_err().is_not_found());
    assert!(sm.get_live_info(UID1).unwrap_err().is_not_found());
    assert!(sm.get_news_info(UID1).unwrap_err().is_not_found());
    assert!(sm.get_uid_first_timestamp(UID1).unwrap_err().is_not_found());
    assert_eq!(sm.inc_not_live_count(UID1).unwrap(), 1);

    // clearing an unknown mid is not an error
    sm.clear_by_mid(UID2).unwrap();
}

#[test]
fn test_group_video_origin_mark() {
    let sm = init_state_manager();
    sm.set_group_video_origin_mark_if_not_exist(G1, "BV1xx411c7mD").unwrap();

    let err = sm.set_group_video_origin_mark_if_not_exist(G1, "BV1xx411c7mD").unwrap_err();
    assert!(matches!(err, StateError::MarkExists { group: G1, .. }));

    // same video, other group
    sm.set_group_video_origin_mark_if_not_exist(G2, "BV1xx411c7mD").unwrap();
}

#[test]
fn test_clear_group_video_origin_marks() {
    let sm = init_state_manager();
    for id in ["a", "b", "c"] {
        sm.set_group_video_origin_mark_if_not_exist(G1, id).unwrap();
    }
    sm.set_group_video_origin_mark_if_not_exist(G2, "a").unwrap();
    // group without a declared index falls back to a scan
    sm.set_group_video_origin_mark_if_not_exist(99, "z").unwrap();

    assert_eq!(sm.clear_group_video_origin_marks(G1).unwrap(), 3);
    assert_eq!(sm.clear_group_video_origin_marks(G1).unwrap(), 0);
    assert_eq!(sm.clear_group_video_origin_marks(99).unwrap(), 1);

    sm.set_group_video_origin_mark_if_not_exist(G1, "a").unwrap();
    assert!(sm.set_group_video_origin_mark_if_not_exist(G2, "a").is_err());
}

// ---------------------------------------------------------------------------
// Stats and cookies
// ---------------------------------------------------------------------------

#[test]
fn test_user_stat() {
    let sm = init_state_manager();
    let stat = UserStat::new(UID1, 12, 3400);
    sm.add_user_stat(Some(&stat), Some(Duration::from_secs(60))).unwrap();
    assert_eq!(sm.get_user_stat(UID1).unwrap(), stat);

    assert!(sm.get_user_stat(UID2).is_err());
    assert!(sm.add_user_stat(None, None).is_err());
}

#[test]
fn test_user_stat_expires() {
    let sm = init_state_manager();
    sm.add_user_stat(Some(&UserStat::new(UID1, 1, 2)), Some(Duration::from_millis(50)))
        .unwrap();
    assert!(sm.get_user_stat(UID1).is_ok());

    std::thread::sleep(Duration::from_millis(150));
    assert!(sm.get_user_stat(UID1).unwrap_err().is_not_found());
}

#[test]
fn test_user_stat_without_ttl_persists() {
    let sm = init_state_manager();
    sm.add_user_stat(Some(&UserStat::new(UID1, 1, 2)), None).unwrap();
    let expiry = sm
        .store()
        .engine()
        .begin_read()
        .unwrap()
        .expires_in(&pulsestore_state::StateKey::UserStat { mid: UID1 }.encode());
    assert_eq!(expiry, Some(None));
}

#[test]
fn test_cookie_info() {
    let sm = init_state_manager();
    let info = CookieInfo::new(
        vec![Cookie::new("SESSDATA", "abc"), Cookie::new("bili_jct", "def"), Cookie::new("empty", "")],
        vec![".bilibili.com".to_string(), "live.bilibili.com".to_string()],
    );
    sm.set_cookie_info("main", Some(&info)).unwrap();
    assert_eq!(sm.get_cookie_info("main").unwrap(), info);

    assert!(sm.get_cookie_info("other").unwrap_err().is_not_found());
    assert!(sm.set_cookie_info("main", None).is_err());

    let replaced = CookieInfo::new(vec![Cookie::new("SESSDATA", "new")], vec![]);
    sm.set_cookie_info("main", Some(&replaced)).unwrap();
    assert_eq!(sm.get_cookie_info("main").unwrap(), replaced);
}

// ---------------------------------------------------------------------------
// Absent payloads and enumeration
// ---------------------------------------------------------------------------

#[test]
fn test_absent_payloads_write_nothing() {
    let sm = init_state_manager();
    assert!(sm.add_user_info(None).is_err());
    assert!(sm.add_live_info(None).is_err());
    assert!(sm.add_news_info(None).is_err());
    assert!(sm.add_user_stat(None, Some(Duration::from_secs(1))).is_err());
    assert!(sm.set_cookie_info("acc", None).is_err());
    assert_eq!(stored_entries(&sm), 0);
    assert_eq!(sm.store().engine().journal_records(), 0);
}

#[test]
fn test_list_user_and_live_infos() {
    let sm = init_state_manager();
    let u2 = UserInfo::new(UID2, 200, "B", "");
    sm.add_user_info(Some(&u2)).unwrap();
    sm.add_live_info(Some(&LiveInfo::new(user1(), "t", "", LiveStatus::Living)))
        .unwrap();

    let users = sm.list_user_infos().unwrap();
    assert_eq!(users, vec![user1(), u2]);

    let lives = sm.list_live_infos().unwrap();
    assert_eq!(lives.len(), 1);
    assert_eq!(lives[0].user, user1());
}

// ---------------------------------------------------------------------------
// Concrete scenario
// ---------------------------------------------------------------------------

#[test]
fn test_concrete_scenario() {
    let sm = init_state_manager();
    let user = UserInfo::new(1, 100, "A", "");
    sm.add_user_info(Some(&user)).unwrap();

    let live = LiveInfo::new(user.clone(), "", "", LiveStatus::Living);
    sm.add_live_info(Some(&live)).unwrap();
    assert_eq!(sm.get_live_info(1).unwrap().status, LiveStatus::Living);
    assert_eq!(sm.get_user_info(1).unwrap(), user);

    sm.delete_live_info(1).unwrap();
    assert!(sm.get_live_info(1).unwrap_err().is_not_found());
    assert_eq!(sm.get_user_info(1).unwrap(), user);
}

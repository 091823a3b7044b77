use std::collections::BTreeSet;

use proptest::prelude::*;
use worldchat::{
    chat::{GroupRoomDefaults, Membership, membership::ensure_group_room},
    model::{GROUP_ROOMS, GroupRoom},
    store::{DocPath, DocumentStore, MemoryStore},
};

async fn load_room(store: &MemoryStore) -> GroupRoom {
    let path = DocPath::new(GROUP_ROOMS, "world").unwrap();
    store.get(&path).await.unwrap().unwrap().decode().unwrap()
}

#[tokio::test]
async fn joining_twice_changes_nothing() {
    let store = MemoryStore::new();
    let defaults = GroupRoomDefaults::default();

    assert_eq!(ensure_group_room(&store, "world", &defaults, "u1").await.unwrap(), Membership::Created);
    let writes = store.stats().writes;
    assert_eq!(ensure_group_room(&store, "world", &defaults, "u1").await.unwrap(), Membership::AlreadyMember);
    assert_eq!(store.stats().writes, writes);

    assert_eq!(ensure_group_room(&store, "world", &defaults, "u2").await.unwrap(), Membership::Joined);
    let room = load_room(&store).await;
    assert_eq!(room.name, "World");
    assert_eq!(room.members, ["u1", "u2"]);
    assert_eq!(room.member_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_keep_count_and_members_in_step() {
    let store = MemoryStore::new();
    let joins: Vec<_> = ["u1", "u2", "u3", "u4"]
        .into_iter()
        .map(|id| {
            let store = store.clone();
            tokio::spawn(async move { ensure_group_room(&store, "world", &GroupRoomDefaults::default(), id).await })
        })
        .collect();
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let room = load_room(&store).await;
    let members: BTreeSet<_> = room.members.iter().cloned().collect();
    assert_eq!(members.len(), 4);
    assert_eq!(room.members.len(), 4);
    assert_eq!(room.member_count, 4);
}

proptest! {
    #[test]
    fn member_count_matches_distinct_members(ids in proptest::collection::vec("[a-d]", 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let room = runtime.block_on(async {
            let store = MemoryStore::new();
            for id in &ids {
                ensure_group_room(&store, "world", &GroupRoomDefaults::default(), id).await.unwrap();
            }
            load_room(&store).await
        });

        let distinct: BTreeSet<_> = ids.iter().cloned().collect();
        prop_assert_eq!(room.members.len(), distinct.len());
        prop_assert_eq!(room.member_count as usize, distinct.len());
        prop_assert_eq!(room.members.iter().cloned().collect::<BTreeSet<_>>(), distinct);
    }
}

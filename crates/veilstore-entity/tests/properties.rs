//! Property tests for entity addressing.

use proptest::prelude::*;

use veilstore_core::{entity_hash, public_hash, TypeTag};
use veilstore_entity::EntityCore;
use veilstore_testkit::{generators, TestFixture, ACCOUNT, NOTE};

proptest! {
    // Secret-free addresses are pure in (tag, id) and never collide with
    // the authenticated address of the same entity.
    #[test]
    fn public_hash_pure_and_distinct_from_keyed_hash(
        id in generators::entity_id(),
        key in generators::symmetric_key(),
    ) {
        let fixture = TestFixture::new();
        let first = EntityCore::new(fixture.pipeline.clone(), ACCOUNT, id, None);
        let second = EntityCore::new(fixture.pipeline.clone(), ACCOUNT, id, Some(key.clone()));

        prop_assert_eq!(first.public_hash(), second.public_hash());
        prop_assert_eq!(first.public_hash(), public_hash(ACCOUNT, id));

        let keyed = second.hash().expect("key present");
        prop_assert_eq!(keyed, entity_hash(key.iv(), ACCOUNT, id));
        prop_assert_ne!(keyed, second.public_hash());
        // Stable for the lifetime of the handle.
        prop_assert_eq!(second.hash(), Some(keyed));
    }

    // Addresses separate by tag even for equal ids and keys.
    #[test]
    fn tags_partition_the_address_space(id in generators::entity_id()) {
        prop_assert_ne!(public_hash(ACCOUNT, id), public_hash(NOTE, id));
    }

    // Two tags with the same name address the same entities.
    #[test]
    fn tag_hash_is_name_pure(id in generators::entity_id()) {
        let a = TypeTag::new("account");
        prop_assert_eq!(public_hash(a, id), public_hash(ACCOUNT, id));
    }
}

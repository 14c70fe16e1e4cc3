//! Registration order is the order callbacks are applied, for any sequence.

use proptest::prelude::*;
use strand_dispatch::{dispatch, get_instance, CommandNode, Composer};

#[derive(Default)]
struct Trace(Vec<u32>);

proptest! {
    #[test]
    fn callbacks_apply_in_registration_order(values in proptest::collection::vec(any::<u32>(), 1..20)) {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        for value in values.clone() {
            composer.register_default::<Trace, Vec<u32>, _, _>(
                &root,
                |t, _| Ok(t.0),
                move |t, _| {
                    t.0.push(value);
                    Ok(())
                },
            );
        }

        let pr = dispatch::parse(&root, ["app"]).unwrap();
        let seen = get_instance::<Vec<u32>>(&pr).unwrap().unwrap();
        prop_assert_eq!(seen.as_slice(), values.as_slice());
        prop_assert_eq!(root.handler().unwrap().depth(), 1);
    }
}

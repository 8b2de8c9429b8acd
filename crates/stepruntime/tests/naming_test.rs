use stepruntime::naming::{alpha, make_child_name, parent_name};

#[test]
fn alpha_encodes_like_spreadsheet_columns() {
    assert_eq!(alpha(0), "A");
    assert_eq!(alpha(1), "B");
    assert_eq!(alpha(25), "Z");
    assert_eq!(alpha(26), "BA");
    assert_eq!(alpha(27), "BB");
    assert_eq!(alpha(51), "BZ");
    assert_eq!(alpha(52), "CA");
}

#[test]
fn child_suffix_kind_alternates_with_parent_tail() {
    // digit tail gets a letter suffix
    assert_eq!(make_child_name("0", 0), "0A");
    assert_eq!(make_child_name("12", 3), "12D");
    // letter tail gets a digit suffix
    assert_eq!(make_child_name("0A", 0), "0A0");
    assert_eq!(make_child_name("0A", 17), "0A17");
}

#[test]
fn parent_name_recovers_the_stem() {
    assert_eq!(parent_name("0A"), "0");
    assert_eq!(parent_name("0A3"), "0A");
    assert_eq!(parent_name("12D"), "12");
    assert_eq!(parent_name("7BA"), "7");
    // a single run has no parent
    assert_eq!(parent_name("0"), "");
    assert_eq!(parent_name("ABC"), "");
}

#[test]
fn naming_round_trips_for_digit_parents() {
    for parent in ["0", "7", "12", "0A3", "0B10"] {
        for index in [0usize, 1, 9, 25, 26, 99] {
            let child = make_child_name(parent, index);
            assert_eq!(
                parent_name(&child),
                parent,
                "round trip failed for parent {} index {}",
                parent,
                index
            );
        }
    }
}

#[test]
fn naming_round_trips_for_letter_parents() {
    for parent in ["0A", "3Z", "0BA"] {
        for index in [0usize, 3, 42] {
            let child = make_child_name(parent, index);
            assert_eq!(parent_name(&child), parent);
        }
    }
}

//! Collections, views and the cells that read them.

use anyhow::Result;
use cellflow::{
    COLLECTION_NAMESPACE, CellflowError, CollectionEvent, ItemId, Location, PropertyValue,
    UserItem, Workbook,
};
use std::cell::RefCell;
use std::rc::Rc;

const NEG_PRIORITY: &str =
    r#"let p = ITEM.Priority; if type_of(p) == "i64" { -p } else { () }"#;

fn titles(wb: &Workbook, name: &str) -> Result<Vec<String>> {
    Ok(wb
        .collections()
        .items_of(name)?
        .into_iter()
        .filter_map(|item| match item.get("Title") {
            Some(PropertyValue::Text(title)) => Some(title.clone()),
            _ => None,
        })
        .collect())
}

fn add_task(wb: &mut Workbook, title: &str, priority: i64) -> Result<ItemId> {
    let item = UserItem::new()
        .with_property("Title", title)
        .with_property("Priority", priority);
    Ok(wb.add_item("Tasks", item)?)
}

#[test]
fn test_view_propagation() -> Result<()> {
    let mut wb = Workbook::new();
    wb.add_function(COLLECTION_NAMESPACE, "urgent_first", NEG_PRIORITY)?;
    wb.create_collection("Tasks", None, None)?;
    wb.create_collection("Urgent", Some("Tasks"), Some("urgent_first"))?;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    wb.on_collection_event(move |event| sink.borrow_mut().push(event.clone()));

    let write = add_task(&mut wb, "write", 2)?;
    add_task(&mut wb, "review", 7)?;
    add_task(&mut wb, "ship", 4)?;
    assert_eq!(titles(&wb, "Urgent")?, vec!["review", "ship", "write"]);
    assert_eq!(titles(&wb, "Tasks")?, vec!["write", "review", "ship"]);

    wb.set_item_property(write, "Priority", 9i64)?;
    assert_eq!(titles(&wb, "Urgent")?, vec!["write", "review", "ship"]);
    assert!(seen.borrow().iter().any(|event| matches!(
        event,
        CollectionEvent::OrderChanged { collection } if collection == "Urgent"
    )));

    wb.remove_item("Tasks", write)?;
    assert_eq!(titles(&wb, "Urgent")?, vec!["review", "ship"]);
    Ok(())
}

#[test]
fn test_sort_is_stable_for_equal_keys() -> Result<()> {
    let mut wb = Workbook::new();
    wb.add_function(COLLECTION_NAMESPACE, "flat", "0")?;
    wb.create_collection("Tasks", None, Some("flat"))?;
    add_task(&mut wb, "P1", 1)?;
    add_task(&mut wb, "P2", 1)?;
    assert_eq!(titles(&wb, "Tasks")?, vec!["P1", "P2"]);
    Ok(())
}

#[test]
fn test_cell_reads_collection_by_computed_name() -> Result<()> {
    let mut wb = Workbook::new();
    wb.create_collection("Tasks", None, None)?;
    wb.create_collection("Done", None, None)?;
    add_task(&mut wb, "a", 1)?;
    add_task(&mut wb, "b", 2)?;

    let picker = Location::new("S", 1, 1);
    wb.set_cell_text(&picker, "Tasks")?;
    let count = wb.set_cell_text(&Location::new("S", 1, 2), "")?;
    wb.set_cell_formula(count, "COLLECTION(A1.Text).len()")?;
    assert_eq!(wb.cell_text(&Location::new("S", 1, 2)), Some("2"));

    wb.set_cell_text(&picker, "Done")?;
    assert_eq!(wb.cell_text(&Location::new("S", 1, 2)), Some("0"));
    assert_eq!(wb.collection_subscribers_of("Done"), vec![count]);
    assert!(wb.collection_subscribers_of("Tasks").is_empty());
    Ok(())
}

#[test]
fn test_load_order_independent_linking() -> Result<()> {
    let mut wb = Workbook::new();
    wb.create_collection("Top", Some("Middle"), None)?;
    wb.create_collection("Middle", Some("Tasks"), None)?;
    wb.create_collection("Tasks", None, None)?;
    add_task(&mut wb, "only", 1)?;
    wb.link_up_collections()?;
    assert_eq!(titles(&wb, "Top")?, vec!["only"]);

    wb.create_collection("Orphan", Some("Missing"), None)?;
    let err = wb.link_up_collections().unwrap_err();
    assert_eq!(err, CellflowError::CollectionLink(vec!["Orphan".to_string()]));
    Ok(())
}

#[test]
fn test_view_cycles_are_rejected() -> Result<()> {
    let mut wb = Workbook::new();
    wb.create_collection("A", None, None)?;
    wb.create_collection("B", Some("A"), None)?;
    let err = wb.become_view("A", "B").unwrap_err();
    assert!(matches!(err, CellflowError::CollectionCycle(_)));
    Ok(())
}

#[test]
fn test_link_up_rejects_cycle_through_pending_base() -> Result<()> {
    let mut wb = Workbook::new();
    wb.create_collection("A", Some("C"), None)?;
    wb.create_collection("B", None, None)?;
    wb.become_view("B", "A")?;
    wb.rename_collection("B", "C")?;

    let err = wb.link_up_collections().unwrap_err();
    assert!(matches!(err, CellflowError::CollectionCycle(_)), "{err}");
    assert!(wb.collections().get("A").is_some_and(|a| a.is_pending_link()));
    Ok(())
}

#[test]
fn test_adding_an_item_twice_is_rejected() -> Result<()> {
    let mut wb = Workbook::new();
    wb.create_collection("Tasks", None, None)?;
    let item = UserItem::new().with_property("Title", "once");
    let id = wb.add_item("Tasks", item.clone())?;

    let err = wb.add_item("Tasks", item.with_property("Title", "twice")).unwrap_err();
    assert_eq!(err, CellflowError::DuplicateItem(id));
    assert_eq!(titles(&wb, "Tasks")?, vec!["once"]);
    Ok(())
}

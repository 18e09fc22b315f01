use rtrace_core::handle_map::HandleMappingTable;
use rtrace_protocol::handle::{Handle, HandleKind};

#[test]
fn test_insert_and_lookup() {
    let table = HandleMappingTable::new();
    table.insert(HandleKind::Buffer, Handle(0x10), 500);
    table.insert(HandleKind::Image, Handle(0x10), 600);

    assert_eq!(table.to_replay(HandleKind::Buffer, Handle(0x10)), Some(500));
    assert_eq!(table.to_replay(HandleKind::Image, Handle(0x10)), Some(600));
    assert_eq!(table.to_replay(HandleKind::Fence, Handle(0x10)), None);
    assert_eq!(table.to_trace(500).len(), 1);
    assert_eq!(table.len(), 2);
}

#[test]
fn test_reinsert_moves_reverse_entry() {
    let table = HandleMappingTable::new();
    table.insert(HandleKind::Fence, Handle(1), 7);
    table.insert(HandleKind::Fence, Handle(1), 8);
    assert!(table.to_trace(7).is_empty());
    assert_eq!(table.to_trace(8)[0].trace, Handle(1));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_export_lines_sorted_decimal() {
    let table = HandleMappingTable::new();
    table.insert(HandleKind::Semaphore, Handle(3), 30);
    table.insert(HandleKind::Buffer, Handle(255), 4096);
    table.insert(HandleKind::Buffer, Handle(17), 9);

    let lines = table.lines();
    assert_eq!(
        lines,
        vec![
            "VkBuffer(17): 9".to_string(),
            "VkBuffer(255): 4096".to_string(),
            "VkSemaphore(3): 30".to_string(),
        ]
    );
}

#[test]
fn test_write_to_file() {
    let table = HandleMappingTable::new();
    table.insert(HandleKind::Device, Handle(2), 20);
    table.insert(HandleKind::Instance, Handle(1), 10);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handles.txt");
    table.write_to(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "VkDevice(2): 20\nVkInstance(1): 10\n");
}

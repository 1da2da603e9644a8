mod common;

use binpost::*;
use common::*;

#[test]
fn parse_image() {
    init_logger();

    let data = pe_image();
    let image = PeImage::parse(&data[..]);
    assert!(image.is_ok(), "image successfully parsed");

    let image = image.unwrap();
    assert_eq!(image.section_table().len(), 1, "one section");
    assert_eq!(image.section_table()[0].name().as_deref(), Some(".text"));
    assert!(image.resource_directory().is_none(), "no resource directory");
    assert_eq!(image.windows_header().file_alignment(), PE_FILE_ALIGNMENT);
}

#[test]
fn reject_invalid_image() {
    init_logger();

    assert!(matches!(
        PeImage::parse(&b"not an executable"[..]),
        Err(ImageReadError::InvalidHeader(_))
    ));
    assert!(matches!(PeImage::parse(&b"MZ"[..]), Err(ImageReadError::InvalidBytes(_))));

    let mut data = pe_image();
    data.truncate(0x100);
    assert!(PeImage::parse(&data[..]).is_err(), "truncated image rejected");
}

#[test]
fn build_resource_directory() {
    init_logger();

    let mut directory = ResourceDirectory::default();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, 3, vec![1, 2, 3, 4, 5]))
        .unwrap();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, "NAMED", vec![6; 17]))
        .unwrap();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::Manifest, 1, b"<assembly/>".to_vec()))
        .unwrap();

    let data = directory.build(0x3000);
    assert_eq!(data.len(), directory.size() as usize, "built resource size equals computed size");

    let parsed = ResourceDirectory::parse(&data, 0, 0x3000).unwrap();
    assert_eq!(directory.root().tables_size(), parsed.root().tables_size());
    assert_eq!(directory.root().strings_size(), parsed.root().strings_size());
    assert_eq!(directory.root().descriptions_size(), parsed.root().descriptions_size());
    assert_eq!(directory.root().data_size(), parsed.root().data_size());
    assert_eq!(
        parsed.get_record(ResourceKind::RawData, &ResourceName::Id(3), 0),
        Some(&[1, 2, 3, 4, 5][..])
    );
    assert_eq!(
        parsed.get_record(ResourceKind::RawData, &ResourceName::Name("NAMED".into()), 0),
        Some(&[6; 17][..])
    );
    assert_eq!(parsed.manifest(), Some(&b"<assembly/>"[..]));
}

#[test]
fn resource_entries_in_loader_order() {
    init_logger();

    let mut directory = ResourceDirectory::default();
    for id in [27, 3, 14] {
        directory
            .insert_record(ResourceRecord::new(ResourceKind::RawData, id, vec![id as u8]))
            .unwrap();
    }
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, "ZZZ", vec![0]))
        .unwrap();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, "AAA", vec![0]))
        .unwrap();

    let names = directory
        .records(ResourceKind::RawData)
        .iter()
        .map(|leaf| leaf.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            ResourceEntryName::from_string("AAA"),
            ResourceEntryName::from_string("ZZZ"),
            ResourceEntryName::ID(3),
            ResourceEntryName::ID(14),
            ResourceEntryName::ID(27),
        ],
        "named entries first, then ids ascending"
    );
}

#[test]
fn replace_resource_record() {
    init_logger();

    let mut directory = ResourceDirectory::default();
    let previous = directory
        .insert_record(ResourceRecord::new(ResourceKind::VersionInfo, 1, vec![1; 8]))
        .unwrap();
    assert!(previous.is_none());
    let previous = directory
        .insert_record(ResourceRecord::new(ResourceKind::VersionInfo, 1, vec![2; 4]))
        .unwrap();
    assert_eq!(previous.map(|data| data.data().to_vec()), Some(vec![1; 8]));
    assert_eq!(directory.records(ResourceKind::VersionInfo).len(), 1, "singleton slot overwritten");
    assert_eq!(directory.first_record(ResourceKind::VersionInfo), Some(&[2; 4][..]));
}

#[test]
fn add_resource_section() {
    init_logger();

    let data = pe_image();
    let mut image = PeImage::parse(&data[..]).unwrap();

    let mut directory = ResourceDirectory::default();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, 3, vec![0xab; 0x300]))
        .unwrap();
    let previous = image.set_resource_directory(directory.clone()).unwrap();
    assert!(previous.is_none(), "no previous resource directory");

    assert_eq!(image.section_table().len(), 2, "resource section added");
    let section = *image
        .section_header_for_data_directory(DataDirectoryType::ResourceTable)
        .unwrap();
    assert_eq!(section.name().as_deref(), Some(".rsrc"));
    assert_eq!({ section.virtual_address }, 0x2000);
    assert_eq!({ section.pointer_to_raw_data }, 0x400);
    assert_eq!({ section.size_of_raw_data } % PE_FILE_ALIGNMENT, 0, "raw size is file aligned");
    assert_eq!(image.windows_header().size_of_image(), 0x3000, "size of image covers new section");

    let new_data = image.data();
    assert_eq!(&new_data[0x200..0x400], &data[0x200..0x400], "code section unchanged");

    let parsed = PeImage::parse(new_data).unwrap();
    assert_eq!(image, parsed, "rebuilt image parses to the same image");
    assert_eq!(
        parsed
            .resource_directory()
            .unwrap()
            .get_record(ResourceKind::RawData, &ResourceName::Id(3), 0),
        Some(&[0xab; 0x300][..])
    );
}

#[test]
fn grow_and_shrink_last_resource_section() {
    init_logger();

    let data = pe_image();
    let mut image = PeImage::parse(&data[..]).unwrap();

    let mut directory = ResourceDirectory::default();
    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, 3, vec![1; 0x100]))
        .unwrap();
    image.set_resource_directory(directory.clone()).unwrap();
    let mut image = PeImage::parse(image.data().to_vec()).unwrap();

    directory
        .insert_record(ResourceRecord::new(ResourceKind::RawData, 27, vec![2; 0x1800]))
        .unwrap();
    image.set_resource_directory(directory.clone()).unwrap();
    assert_eq!(image.section_table().len(), 2, "last resource section reused when growing");
    let section = image.section_table()[1];
    assert!({ section.size_of_raw_data } >= directory.size() as u32);
    assert_eq!(image.windows_header().size_of_image(), 0x4000, "size of image grows with section");
    assert_eq!(image.data().len(), 0x400 + { section.size_of_raw_data } as usize);

    let mut small = ResourceDirectory::default();
    small
        .insert_record(ResourceRecord::new(ResourceKind::RawData, 3, vec![3; 0x10]))
        .unwrap();
    let mut image = PeImage::parse(image.data().to_vec()).unwrap();
    image.set_resource_directory(small).unwrap();
    assert_eq!(image.section_table().len(), 2, "last resource section reused when shrinking");
    assert_eq!({ image.section_table()[1].size_of_raw_data }, PE_FILE_ALIGNMENT);

    let parsed = PeImage::parse(image.data()).unwrap();
    let resources = parsed.resource_directory().unwrap();
    assert_eq!(resources.records(ResourceKind::RawData).len(), 1);
    assert_eq!(
        resources.get_record(ResourceKind::RawData, &ResourceName::Id(3), 0),
        Some(&[3; 0x10][..])
    );
}

#[test]
fn write_resources_to_file() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let path = write_pe(dir.path(), "app.exe");

    add_resource_to_file(&path, ResourceRecord::new(ResourceKind::RawData, 3, vec![7; 64])).unwrap();
    add_resource_to_file(&path, ResourceRecord::new(ResourceKind::RawData, 27, vec![8; 32])).unwrap();

    let resources = read_resources(&path).unwrap().unwrap();
    assert_eq!(resources.records(ResourceKind::RawData).len(), 2);
    assert_eq!(
        resources.get_record(ResourceKind::RawData, &ResourceName::Id(27), 0),
        Some(&[8; 32][..])
    );
}

#[test]
fn discard_resource_update() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let path = write_pe(dir.path(), "app.exe");

    let mut update = ResourceUpdate::begin(&path).unwrap();
    update.add(ResourceRecord::new(ResourceKind::RawData, 3, vec![1; 16])).unwrap();
    assert_eq!(update.pending(), 1);
    update.discard();

    let mut update = ResourceUpdate::begin(&path).unwrap();
    update.add(ResourceRecord::new(ResourceKind::RawData, 3, vec![1; 16])).unwrap();
    drop(update);

    assert_eq!(std::fs::read(&path).unwrap(), pe_image(), "file unchanged without commit");
    assert!(read_resources(&path).unwrap().is_none());
}

#[test]
fn missing_target() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let result = add_resource_to_file(
        dir.path().join("missing.exe"),
        ResourceRecord::new(ResourceKind::RawData, 3, vec![]),
    );
    assert!(matches!(result, Err(EmbedError::TargetMissing(_))));

    let invalid = dir.path().join("invalid.exe");
    std::fs::write(&invalid, b"MZ not really").unwrap();
    let result = ResourceUpdate::begin(&invalid);
    assert!(matches!(result, Err(EmbedError::OpenResources { .. })));
}

#[test]
fn copy_resources_between_files() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let source = write_pe(dir.path(), "source.exe");
    let target = write_pe(dir.path(), "target.exe");

    add_resources_to_file(
        &source,
        [
            ResourceRecord::new(ResourceKind::GroupIcon, 1, vec![1; 20]),
            ResourceRecord::new(ResourceKind::Icon, 1, vec![2; 40]),
            ResourceRecord::new(ResourceKind::Icon, 2, vec![3; 40]),
            ResourceRecord::new(ResourceKind::RawData, 3, vec![4; 10]),
        ],
    )
    .unwrap();
    add_resource_to_file(&target, ResourceRecord::new(ResourceKind::Icon, 1, vec![9; 8])).unwrap();

    let copied = copy_resources_from_file_to_file(
        &source,
        &target,
        &[ResourceKind::Icon, ResourceKind::GroupIcon],
    )
    .unwrap();
    assert_eq!(copied, 3, "two icons and one group icon copied");

    let resources = read_resources(&target).unwrap().unwrap();
    assert_eq!(resources.records(ResourceKind::Icon).len(), 2);
    assert_eq!(
        resources.get_record(ResourceKind::Icon, &ResourceName::Id(1), 0),
        Some(&[2; 40][..]),
        "existing resource replaced"
    );
    assert!(resources.records(ResourceKind::RawData).is_empty(), "other kinds not copied");

    let empty = write_pe(dir.path(), "empty.exe");
    let copied =
        copy_resources_from_file_to_file(&empty, &target, &[ResourceKind::Icon]).unwrap();
    assert_eq!(copied, 0, "nothing to copy is not an error");
}

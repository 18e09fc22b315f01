mod common;

use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, DEVICE, QUEUE};
use rtrace_protocol::command::{CommandArgs, CommandKind};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::ImageCreateInfo;
use rtrace_replay::error::{ReplayError, Result};
use rtrace_replay::format;
use rtrace_replay::mutate::Mutator;
use rtrace_replay::primer::{self, ImagePrimer, PrimeRequest, ShaderCompiler};
use rtrace_replay::replay_builder::InstructionStream;
use rtrace_replay::state::ImageInfo;
use rtrace_replay::transform::Writer;

const IMAGE: Handle = Handle(0xB000);

fn image_info(format: vk::Format, usage: vk::ImageUsageFlags) -> ImageInfo {
    ImageInfo {
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: [16, 16, 1],
        mip_levels: 1,
        array_layers: 1,
        samples: 1,
        usage,
    }
}

fn storage_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED
}

fn assert_unsupported(info: ImageInfo) {
    match primer::check_supported(&info) {
        Err(ReplayError::UnsupportedFormat { format, .. }) => assert_eq!(format, info.format),
        other => panic!("{:?} accepted: {:?}", info.format, other.map(|s| s.qualifier)),
    }
}

#[test]
fn test_check_supported_rejects_unwritable_images() {
    assert_unsupported(image_info(vk::Format::D32_SFLOAT, storage_usage()));
    assert_unsupported(image_info(vk::Format::D24_UNORM_S8_UINT, storage_usage()));
    assert_unsupported(image_info(vk::Format::BC7_UNORM_BLOCK, storage_usage()));
    assert_unsupported(image_info(vk::Format::R8G8B8A8_SRGB, storage_usage()));
    assert_unsupported(image_info(vk::Format::UNDEFINED, storage_usage()));
    assert_unsupported(image_info(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED));
    assert_unsupported(ImageInfo {
        image_type: vk::ImageType::TYPE_3D,
        ..image_info(vk::Format::R8G8B8A8_UNORM, storage_usage())
    });
    assert_unsupported(ImageInfo { samples: 4, ..image_info(vk::Format::R8G8B8A8_UNORM, storage_usage()) });
}

#[test]
fn test_check_supported_accepts_storage_color_images() {
    let storage = primer::check_supported(&image_info(vk::Format::R8G8B8A8_UNORM, storage_usage())).unwrap();
    assert_eq!(storage.qualifier, "rgba8");
    assert_eq!(storage.image_type, "image2D");

    let storage = primer::check_supported(&image_info(vk::Format::R32_UINT, storage_usage())).unwrap();
    assert_eq!(storage.image_type, "uimage2D");
}

#[test]
fn test_shader_source_declares_storage_image() {
    let storage = primer::check_supported(&image_info(vk::Format::R32G32B32A32_SFLOAT, storage_usage())).unwrap();
    let source = primer::shader_source(&storage);
    assert!(source.starts_with("#version 450"));
    assert!(source.contains("local_size_x = 8, local_size_y = 8"));
    assert!(source.contains("rgba32f) uniform writeonly image2D dst"));
    assert!(source.contains(storage.decode));
}

#[test]
fn test_format_sizes() {
    assert_eq!(format::mip_extent([16, 4, 1], 3), [2, 1, 1]);
    assert_eq!(format::image_size(vk::Format::R8G8B8A8_UNORM, [4, 4, 1], 3, 1), Some(64 + 16 + 4));
    // 4x4 blocks of 16 bytes; a 1x1 level still takes a whole block.
    assert_eq!(format::image_size(vk::Format::BC7_UNORM_BLOCK, [8, 8, 1], 4, 2), Some((64 + 16 + 16 + 16) * 2));
    assert_eq!(format::image_size(vk::Format::UNDEFINED, [8, 8, 1], 1, 1), None);
}

/// Records every source it is asked to compile.
struct RecordingCompiler(Rc<RefCell<Vec<String>>>);

impl ShaderCompiler for RecordingCompiler {
    fn compile_compute(&mut self, source: &str) -> Result<Vec<u32>> {
        self.0.borrow_mut().push(source.to_string());
        Ok(vec![0x0723_0203, 0, 0, 0, 0])
    }
}

fn create_image(t: &mut Trace, out: &mut dyn Writer, image: Handle, format: vk::Format, usage: vk::ImageUsageFlags) {
    let (p_create_info, info) = t.pod(&ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO.as_raw(),
        image_type: vk::ImageType::TYPE_2D.as_raw(),
        format: format.as_raw(),
        extent: [20, 12, 1],
        mip_levels: 2,
        array_layers: 1,
        samples: 1,
        usage: usage.as_raw(),
        initial_layout: vk::ImageLayout::UNDEFINED.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_image, handle) = t.output(image);
    let cmd = common::command(
        CommandArgs::CreateImage { device: DEVICE, p_create_info, p_allocator: 0, p_image },
        vec![info],
        vec![handle],
    );
    let id = t.id();
    out.write(id, &cmd).unwrap();
}

fn kinds(stream: &InstructionStream) -> Vec<CommandKind> {
    stream
        .instructions()
        .iter()
        .filter_map(|i| match i {
            Instruction::Call { command, .. } => Some(command.kind()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_prime_by_copy_uploads_and_transitions() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        create_image(&mut t, &mut m, IMAGE, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::TRANSFER_DST);
        let data = vec![0x5a; (20 * 12 + 10 * 6) * 4];
        let req = PrimeRequest {
            device: DEVICE,
            queue: QUEUE,
            image: IMAGE,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            data: &data,
        };
        primer::prime_by_copy(&mut m, &req).unwrap();
    }

    let kinds = kinds(&stream);
    let at = |k| kinds.iter().position(|x| *x == k).unwrap();
    assert!(at(CommandKind::CmdCopyBufferToImage) < at(CommandKind::QueueSubmit));
    assert_eq!(state.image(IMAGE).unwrap().layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_prime_by_shader_dispatches_per_subresource() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let sources = Rc::new(RefCell::new(Vec::new()));
    let mut image_primer = ImagePrimer::new(Box::new(RecordingCompiler(Rc::clone(&sources))));
    let second = Handle(0xB001);
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        create_image(&mut t, &mut m, IMAGE, vk::Format::R8G8B8A8_UNORM, storage_usage());
        create_image(&mut t, &mut m, second, vk::Format::R8G8B8A8_UNORM, storage_usage());
        let data = vec![0xff; (20 * 12 + 10 * 6) * 4];
        for image in [IMAGE, second] {
            let req = PrimeRequest { device: DEVICE, queue: QUEUE, image, layout: vk::ImageLayout::GENERAL, data: &data };
            image_primer.prime_by_shader(&mut m, &req).unwrap();
        }
    }

    // One pipeline per format and device.
    assert_eq!(sources.borrow().len(), 1);
    assert!(sources.borrow()[0].contains("rgba8"));
    assert_eq!(image_primer.devices(), vec![DEVICE]);

    let kinds = kinds(&stream);
    let count = |k| kinds.iter().filter(|x| **x == k).count();
    // Two levels for each of the two images.
    assert_eq!(count(CommandKind::CmdDispatch), 4);
    assert_eq!(count(CommandKind::CreateComputePipelines), 1);
    assert_eq!(count(CommandKind::CreateImageView), count(CommandKind::DestroyImageView));
    assert_eq!(state.image(IMAGE).unwrap().layout, vk::ImageLayout::GENERAL);
    assert_eq!(state.allocator().live_count(), 0);

    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    image_primer.release(&mut m, DEVICE).unwrap();
    drop(m);
    assert!(image_primer.devices().is_empty());
    let kinds = self::kinds(&stream);
    assert!(kinds.contains(&CommandKind::DestroyPipeline));
    assert_eq!(kinds.last(), Some(&CommandKind::DestroyDescriptorSetLayout));
}

#[test]
fn test_prime_by_shader_rejects_images_without_storage() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let sources = Rc::new(RefCell::new(Vec::new()));
    let mut image_primer = ImagePrimer::new(Box::new(RecordingCompiler(Rc::clone(&sources))));
    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    common::bring_up(&mut t, &mut m).unwrap();
    create_image(&mut t, &mut m, IMAGE, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);

    let req = PrimeRequest { device: DEVICE, queue: QUEUE, image: IMAGE, layout: vk::ImageLayout::GENERAL, data: &[] };
    let err = image_primer.prime_by_shader(&mut m, &req).unwrap_err();
    assert!(matches!(err, ReplayError::UnsupportedFormat { .. }));
    assert!(sources.borrow().is_empty());
}

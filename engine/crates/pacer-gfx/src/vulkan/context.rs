use std::ffi::{CStr, CString};

use ash::vk;

use crate::device::GfxError;

/// 无窗口的 Vulkan 上下文
///
/// 持有 entry、instance、device 以及一个全能 queue。
/// 在 drop 之后 entry 会卸载 dll，因此 entry 必须最后释放。
pub struct VulkanContext {
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) queue_family_index: u32,
    pub(crate) queue: vk::Queue,

    _entry: ash::Entry,
}

// 创建与销毁
impl VulkanContext {
    pub fn new(app_name: &str) -> Result<Self, GfxError> {
        let _span = tracy_client::span!("VulkanContext::new");
        let entry = unsafe { ash::Entry::load() }?;

        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = c"pacer";
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 需要 synchronization2 以及 copy_buffer_to_image2
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0));
        let instance =
            unsafe { entry.create_instance(&vk::InstanceCreateInfo::default().application_info(&app_info), None) }?;

        match Self::create_device(&instance) {
            Ok((physical_device, queue_family_index, device)) => {
                let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
                log::info!("vulkan upload queue family: {}", queue_family_index);
                Ok(Self {
                    instance,
                    physical_device,
                    device,
                    queue_family_index,
                    queue,
                    _entry: entry,
                })
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn create_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32, ash::Device), GfxError> {
        let (physical_device, queue_family_index) = Self::pick_physical_device(instance)?;

        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&[1.0])];
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let device_ci = vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos).push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &device_ci, None) }?;
        Ok((physical_device, queue_family_index, device))
    }

    /// 优先使用独立显卡，需要支持 vulkan 1.3 以及 graphics + transfer queue
    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32), GfxError> {
        let candidates: Vec<_> = unsafe { instance.enumerate_physical_devices() }?
            .into_iter()
            .filter_map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(pdevice) };
                if props.api_version < vk::API_VERSION_1_3 {
                    return None;
                }
                let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pdevice) }
                    .iter()
                    .position(|family| {
                        family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)
                    })? as u32;

                let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
                log::info!("found gpu: {:?}", name);
                Some((pdevice, queue_family_index, props.device_type))
            })
            .collect();

        candidates
            .iter()
            .find(|(_, _, device_type)| *device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| candidates.first())
            .map(|(pdevice, queue_family_index, _)| (*pdevice, *queue_family_index))
            .ok_or(GfxError::NoSuitableDevice)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            // 等待所有提交完成，返回值无需处理：设备丢失时同样需要继续销毁
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

use slotmap::new_key_type;

// 上传设备对外暴露的 GPU 对象句柄，具体资源由设备内部的 SlotMap 持有
new_key_type! {
    /// 持久映射的 staging buffer
    pub struct StagingBufferHandle;
    /// CPU 可查询的 fence
    pub struct FenceHandle;
    /// GPU 纹理
    pub struct TextureHandle;
    /// 模型顶点/索引数据所在的 GPU buffer
    pub struct GpuBufferHandle;
}

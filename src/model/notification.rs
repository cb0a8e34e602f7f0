use std::time::{Duration, SystemTime, UNIX_EPOCH};
use bytes::Bytes;
use crate::error::ApnsError;
use crate::model::device::Device;
use crate::protocol::{FrameRef, Identifier, MAX_PAYLOAD_LEN};

#[derive(Debug, Clone)]
struct Target {
    device: Device,
    /// assigned when this device's frame is written, reassigned on every retry
    identifier: Identifier,
}

/// A pre-serialized payload going to one or more devices.
///
/// `device_index` is where writing (re)starts: devices before it are done with. The push
///  connection moves it forward as it learns about the fate of writes, and it never moves
///  backwards. A completed notification has `device_index() == device_count()`.
#[derive(Debug, Clone)]
pub struct Notification {
    expiration: u32,
    priority: u8,
    payload: Bytes,
    targets: Vec<Target>,
    device_index: usize,
}

impl Notification {
    /// `expiration` is in seconds since 1970, `0` asking APNs not to store the notification
    ///  at all
    pub fn new(payload: impl Into<Bytes>, expiration: u32, priority: u8, devices: impl IntoIterator<Item = Device>) -> Result<Notification, ApnsError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ApnsError::PayloadTooLarge { len: payload.len(), max: MAX_PAYLOAD_LEN });
        }

        Ok(Notification {
            expiration,
            priority,
            payload,
            targets: devices.into_iter()
                .map(|device| Target { device, identifier: Identifier::ZERO })
                .collect(),
            device_index: 0,
        })
    }

    /// Expiration epoch for a notification that should be dropped by APNs if it can not be
    ///  delivered within `ttl`
    pub fn expiration_after(ttl: Duration) -> u32 {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(ttl)
            .as_secs();
        u32::try_from(epoch).unwrap_or(u32::MAX)
    }

    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.targets.iter().map(|t| &t.device)
    }

    pub fn device(&self, index: usize) -> Option<&Device> {
        self.targets.get(index).map(|t| &t.device)
    }

    pub fn device_count(&self) -> usize {
        self.targets.len()
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn is_complete(&self) -> bool {
        self.device_index == self.targets.len()
    }

    /// Moves past the device at `device_index`, typically after APNs rejected it, so the
    ///  notification can be resubmitted for its remaining devices.
    pub fn skip_device(&mut self) {
        self.device_index = (self.device_index + 1).min(self.targets.len());
    }

    /// Splits the devices that are still to be written into one notification per partition
    ///  (see [Device::partition]). Index `i` of the result holds partition `i`'s share, or
    ///  `None` if none of the devices fall into it.
    pub fn split_by_partition(&self, shard_count: u16) -> Vec<Option<Notification>> {
        let mut result: Vec<Option<Notification>> = vec![None; shard_count as usize];

        for target in &self.targets[self.device_index..] {
            let partition = target.device.partition(shard_count) as usize;
            result[partition]
                .get_or_insert_with(|| Notification {
                    expiration: self.expiration,
                    priority: self.priority,
                    payload: self.payload.clone(),
                    targets: Vec::new(),
                    device_index: 0,
                })
                .targets
                .push(Target { device: target.device, identifier: Identifier::ZERO });
        }
        result
    }

    pub(crate) fn frame(&self, index: usize) -> FrameRef<'_> {
        let target = &self.targets[index];
        FrameRef {
            token: target.device.token(),
            payload: &self.payload,
            identifier: target.identifier,
            expiration: self.expiration,
            priority: self.priority,
        }
    }

    pub(crate) fn identifier(&self, index: usize) -> Identifier {
        self.targets[index].identifier
    }

    pub(crate) fn assign_identifier(&mut self, index: usize, identifier: Identifier) {
        self.targets[index].identifier = identifier;
    }

    pub(crate) fn last_identifier(&self) -> Option<Identifier> {
        self.targets.last().map(|t| t.identifier)
    }

    pub(crate) fn mark_complete(&mut self) {
        self.device_index = self.targets.len();
    }

    pub(crate) fn set_device_index(&mut self, device_index: usize) {
        debug_assert!(device_index >= self.device_index);
        debug_assert!(device_index <= self.targets.len());
        self.device_index = device_index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u8) -> Device {
        Device::new([n; 32])
    }

    #[test]
    fn test_payload_bound() {
        assert!(Notification::new(vec![b'x'; MAX_PAYLOAD_LEN], 0, 10, [device(1)]).is_ok());
        assert!(matches!(
            Notification::new(vec![b'x'; MAX_PAYLOAD_LEN + 1], 0, 10, [device(1)]),
            Err(ApnsError::PayloadTooLarge { len: 2049, max: 2048 })
        ));
    }

    #[test]
    fn test_skip_device() {
        let mut n = Notification::new("{}", 0, 10, [device(1), device(2)]).unwrap();
        assert_eq!(n.device_index(), 0);
        n.skip_device();
        assert_eq!(n.device_index(), 1);
        n.skip_device();
        assert!(n.is_complete());
        n.skip_device();
        assert_eq!(n.device_index(), 2);
    }

    #[test]
    fn test_frame_uses_assigned_identifier() {
        let mut n = Notification::new("{}", 1234, 5, [device(1), device(2)]).unwrap();
        n.assign_identifier(1, Identifier::from_raw(77));

        let frame = n.frame(1);
        assert_eq!(frame.token, device(2).token());
        assert_eq!(frame.identifier, Identifier::from_raw(77));
        assert_eq!(frame.expiration, 1234);
        assert_eq!(frame.priority, 5);
        assert_eq!(n.last_identifier(), Some(Identifier::from_raw(77)));
    }

    #[test]
    fn test_split_by_partition() {
        let devices: Vec<Device> = (0..20).map(device).collect();
        let mut n = Notification::new("{}", 0, 10, devices.clone()).unwrap();
        n.skip_device();

        let parts = n.split_by_partition(3);
        assert_eq!(parts.len(), 3);

        let mut total = 0;
        for (partition, part) in parts.iter().enumerate() {
            if let Some(part) = part {
                assert_eq!(part.device_index(), 0);
                assert!(part.devices().all(|d| d.partition(3) as usize == partition));
                total += part.device_count();
            }
        }
        assert_eq!(total, 19);
    }

    #[test]
    fn test_expiration_after() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        let expiration = Notification::expiration_after(Duration::from_secs(3600));
        assert!(expiration >= now + 3600);
        assert!(expiration <= now + 3601);
    }
}

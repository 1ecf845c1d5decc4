use chrono::{DateTime, Datelike, Local, Offset, TimeZone};

use crate::protocol::{
    BROADCAST_ADDRESS, Packet,
    commands::{PacketKind, SetDaylightSaving, SetRealtimeClock, SetRealtimeDate},
};

/// Packets that set time, date and daylight saving of every module to `now`.
pub fn clock_sync_packets<Tz: TimeZone>(
    now: &DateTime<Tz>,
    daylight_saving: bool,
) -> [Packet; 3] {
    [
        SetRealtimeClock::at(BROADCAST_ADDRESS, now).to_packet(),
        SetRealtimeDate::at(BROADCAST_ADDRESS, now).to_packet(),
        SetDaylightSaving {
            address: BROADCAST_ADDRESS,
            enabled: daylight_saving,
        }
        .to_packet(),
    ]
}

/// [`clock_sync_packets`] for the local time of the host.
pub fn local_clock_sync_packets() -> [Packet; 3] {
    let now = Local::now();
    clock_sync_packets(&now, is_daylight_saving(&now))
}

/// Daylight saving is in effect when the current UTC offset is ahead of the smaller of the
/// January and July offsets.
fn is_daylight_saving(now: &DateTime<Local>) -> bool {
    let offset = now.offset().fix().local_minus_utc();
    let standard = [1, 7]
        .into_iter()
        .filter_map(|month| {
            Local
                .with_ymd_and_hms(now.year(), month, 1, 12, 0, 0)
                .earliest()
        })
        .map(|time| time.offset().fix().local_minus_utc())
        .min();

    standard.is_some_and(|standard| offset > standard)
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use crate::protocol::{Priority, command};

    use super::*;

    #[test]
    fn broadcasts_time_date_and_daylight_saving() {
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 14, 9, 41, 0)
            .unwrap();

        let [clock, date, daylight_saving] = clock_sync_packets(&now, true);

        assert_eq!(clock.address(), BROADCAST_ADDRESS);
        assert_eq!(clock.command(), command::SET_REALTIME_CLOCK);
        assert_eq!(clock.payload(), &[0x06, 9, 41]);
        assert_eq!(date.command(), command::SET_REALTIME_DATE);
        assert_eq!(date.payload(), &[14, 7, 0x07, 0xE8]);
        assert_eq!(daylight_saving.payload(), &[0x01]);
        assert_eq!(daylight_saving.priority(), Priority::Low);
    }

    #[test]
    fn utc_time_uses_utc_fields() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let [clock, ..] = clock_sync_packets(&now, false);

        assert_eq!(clock.payload(), &[0x02, 0, 5]);
    }

    #[test]
    fn local_packets_are_well_formed() {
        for packet in local_clock_sync_packets() {
            assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
        }
    }
}

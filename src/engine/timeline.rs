use crate::model::*;

// ── Slot timeline ────────────────────────────────────────────────

/// Cut the operating window of the day containing `day` into the room's slots
/// and classify each one. A slot overlapping any non-cancelled booking is
/// booked, even when it already lies in the past; otherwise it is past once
/// `now` has gone beyond its end. The last slot is clipped at closing time.
pub fn room_slots(rs: &RoomState, day: Ms, now: Ms) -> Vec<SlotInfo> {
    let room = &rs.room;
    let base = day_start(day);
    let open = base + Ms::from(room.available_from) * MINUTE_MS;
    let close = base + Ms::from(room.available_to) * MINUTE_MS;
    let step = Ms::from(room.slot_duration.max(1)) * MINUTE_MS;
    if open >= close {
        return Vec::new();
    }

    let busy = merge_overlapping(
        &rs.blocking(open, close)
            .map(|b| Span::new(b.start_at.max(open), b.end_at.min(close)))
            .collect::<Vec<_>>(),
    );

    let mut slots = Vec::with_capacity(((close - open) / step + 1) as usize);
    let mut bi = 0;
    let mut start = open;
    while start < close {
        let span = Span::new(start, (start + step).min(close));
        while bi < busy.len() && busy[bi].end <= span.start {
            bi += 1;
        }
        let state = if busy.get(bi).is_some_and(|b| b.overlaps(&span)) {
            SlotState::Booked
        } else if now > span.end {
            SlotState::Past
        } else {
            SlotState::Available
        };
        slots.push(SlotInfo { span, state });
        start = span.end;
    }
    slots
}

/// Merge intervals (sorted by start) that overlap or touch.
fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const DAY: Ms = 20_000 * DAY_MS;

    fn at(h: Ms, m: Ms) -> Ms {
        DAY + (h * 60 + m) * MINUTE_MS
    }

    fn state(slot: u32, from: u32, to: u32) -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            name: "Lagoon".into(),
            color: "blue".into(),
            capacity: 6,
            slot_duration: slot,
            available_from: from,
            available_to: to,
        })
    }

    fn book(rs: &mut RoomState, start: Ms, end: Ms, status: BookingStatus) {
        rs.insert_booking(Booking {
            id: Ulid::new(),
            room_id: rs.room.id,
            name: "Kai".into(),
            email: "kai@example.com".into(),
            phone: "555-0123".into(),
            title: "Review".into(),
            start_at: start,
            end_at: end,
            attendees: 3,
            slots: 1,
            status,
            created_at: 0,
        });
    }

    fn states(slots: &[SlotInfo]) -> Vec<SlotState> {
        slots.iter().map(|s| s.state).collect()
    }

    #[test]
    fn window_split_into_slots() {
        let rs = state(30, 480, 600);
        let slots = room_slots(&rs, at(12, 0), 0);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].span, Span::new(at(8, 0), at(8, 30)));
        assert_eq!(slots[3].span, Span::new(at(9, 30), at(10, 0)));
        assert!(slots.iter().all(|s| s.state == SlotState::Available));
    }

    #[test]
    fn last_slot_clipped_at_closing() {
        let rs = state(45, 480, 570);
        let slots = room_slots(&rs, DAY, 0);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].span, Span::new(at(8, 45), at(9, 30)));

        let rs = state(60, 480, 570);
        let slots = room_slots(&rs, DAY, 0);
        assert_eq!(slots[1].span, Span::new(at(9, 0), at(9, 30)));
    }

    #[test]
    fn booked_past_and_cancelled() {
        let mut rs = state(30, 480, 600);
        book(&mut rs, at(8, 15), at(8, 45), BookingStatus::Ended);
        book(&mut rs, at(9, 30), at(10, 0), BookingStatus::Cancelled);

        let slots = room_slots(&rs, DAY, at(9, 10));
        assert_eq!(
            states(&slots),
            vec![
                SlotState::Booked,
                SlotState::Booked,
                SlotState::Available,
                SlotState::Available,
            ]
        );

        let later = room_slots(&rs, DAY, at(11, 0));
        assert_eq!(
            states(&later),
            vec![
                SlotState::Booked,
                SlotState::Booked,
                SlotState::Past,
                SlotState::Past,
            ]
        );
    }

    #[test]
    fn bookings_on_other_days_ignored() {
        let mut rs = state(60, 480, 600);
        book(&mut rs, at(8, 0) + DAY_MS, at(10, 0) + DAY_MS, BookingStatus::Confirmed);
        book(&mut rs, at(8, 0) - DAY_MS, at(10, 0) - DAY_MS, BookingStatus::Confirmed);
        let slots = room_slots(&rs, DAY, 0);
        assert!(slots.iter().all(|s| s.state == SlotState::Available));
    }

    #[test]
    fn merge_touching() {
        let merged = merge_overlapping(&[Span::new(0, 10), Span::new(10, 20), Span::new(30, 40)]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);
    }
}

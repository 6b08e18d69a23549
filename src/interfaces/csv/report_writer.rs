use crate::domain::booking::Booking;
use crate::domain::fare::FARE_PRECISION;
use crate::domain::trip::Trip;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use uuid::Uuid;

#[derive(Serialize)]
struct TripRow<'a> {
    trip: Uuid,
    driver: &'a str,
    total_seats: u32,
    seats_available: u32,
    status: &'static str,
}

#[derive(Serialize)]
struct BookingRow<'a> {
    booking: Uuid,
    trip: Uuid,
    rider: &'a str,
    seats: u32,
    fare: String,
    status: &'static str,
    payment_tx: &'a str,
}

/// Writes the final state as two CSV tables, trips then bookings, separated by
/// a blank line. Fares always carry six fractional digits.
pub struct ReportWriter<W: Write> {
    inner: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_report(&mut self, trips: &[Trip], bookings: &[Booking]) -> Result<()> {
        self.write_trips(trips)?;
        writeln!(self.inner)?;
        self.write_bookings(bookings)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn write_trips(&mut self, trips: &[Trip]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(&mut self.inner);
        if trips.is_empty() {
            writer.write_record(["trip", "driver", "total_seats", "seats_available", "status"])?;
        }
        for trip in trips {
            writer.serialize(TripRow {
                trip: trip.id,
                driver: &trip.driver_id,
                total_seats: trip.total_seats,
                seats_available: trip.seats_available,
                status: trip.status.as_str(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_bookings(&mut self, bookings: &[Booking]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(&mut self.inner);
        if bookings.is_empty() {
            writer.write_record(["booking", "trip", "rider", "seats", "fare", "status", "payment_tx"])?;
        }
        for booking in bookings {
            writer.serialize(BookingRow {
                booking: booking.id,
                trip: booking.trip_id,
                rider: &booking.rider_id,
                seats: booking.seats_booked,
                fare: format!("{:.*}", FARE_PRECISION as usize, booking.total_fare),
                status: booking.status.as_str(),
                payment_tx: booking.payment_tx_id.as_deref().unwrap_or(""),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trip::{Location, NewTrip, Pricing};
    use rust_decimal_macros::dec;

    #[test]
    fn test_report_layout() {
        let trip = Trip::new(NewTrip {
            id: None,
            driver_id: "dana".into(),
            origin: Location::named("Quad"),
            destination: Location::named("Pier"),
            distance: dec!(10),
            pricing: Pricing::PerDistanceUnit {
                unit_price: dec!(0.01),
            },
            seats: 3,
            departure_time: None,
        });
        let mut booking = Booking::new(trip.id, "riley".into(), 2, dec!(0.2));
        booking.confirm("TXA").unwrap();

        let mut out = Vec::new();
        ReportWriter::new(&mut out)
            .write_report(&[trip.clone()], &[booking.clone()])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "trip,driver,total_seats,seats_available,status");
        assert_eq!(lines[1], format!("{},dana,3,3,active", trip.id));
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "booking,trip,rider,seats,fare,status,payment_tx");
        assert_eq!(
            lines[4],
            format!("{},{},riley,2,0.200000,confirmed,TXA", booking.id, trip.id)
        );
    }

    #[test]
    fn test_empty_report_keeps_headers() {
        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_report(&[], &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("trip,driver,total_seats,seats_available,status\n\nbooking,"));
    }
}

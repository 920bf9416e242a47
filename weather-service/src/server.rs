use crate::pb::weather_service_server::WeatherService;
use crate::pb::{
    GetWeatherForecastRequest, GetWeatherForecastResponse, GetWeatherRequest, GetWeatherResponse,
};
use tonic::{Request, Response, Status};

/// Canned answers for the unary weather methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct Weather;

#[tonic::async_trait]
impl WeatherService for Weather {
    async fn get_weather(
        &self,
        request: Request<GetWeatherRequest>,
    ) -> Result<Response<GetWeatherResponse>, Status> {
        let request = request.into_inner();
        if request.location.is_empty() {
            return Err(Status::invalid_argument("location is required"));
        }

        Ok(Response::new(GetWeatherResponse {
            temperature_c: 22.5,
            conditions: "Partly cloudy".to_string(),
            humidity: 65,
        }))
    }

    async fn get_weather_forecast(
        &self,
        request: Request<GetWeatherForecastRequest>,
    ) -> Result<Response<GetWeatherForecastResponse>, Status> {
        let request = request.into_inner();
        if request.date.is_empty() {
            return Err(Status::invalid_argument("date is required"));
        }
        if !is_calendar_date(&request.date) {
            return Err(Status::invalid_argument(
                "invalid date format. Please use YYYY-MM-DD format",
            ));
        }

        Ok(Response::new(GetWeatherForecastResponse {
            temperature_c: 24.8,
            conditions: "Sunny with light clouds".to_string(),
            humidity: 58,
            date: request.date,
            location: request.location,
        }))
    }
}

/// `YYYY-MM-DD` with a month in 1..=12 and a day in 1..=31.
fn is_calendar_date(date: &str) -> bool {
    let parts: Vec<&str> = date.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return false;
    };
    let digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if !(digits(year, 4) && digits(month, 2) && digits(day, 2)) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12)) && matches!(day.parse::<u8>(), Ok(1..=31))
}
